use std::path::PathBuf;

use rocket::fs::NamedFile;
use rocket::http::Status;
use rocket::State;

use crate::config::Config;
use crate::resp::problem::Problem;

async fn app_index_file(c: &Config) -> Result<NamedFile, Problem> {
    let index = c.public_content.join("index.html");
    NamedFile::open(&index).await.map_err(|e| {
        tracing::warn!("Unable to open '{}': {}", index.display(), e);
        Problem::new_untyped(Status::NotFound, "Web client isn't installed.")
    })
}

#[get("/")]
pub async fn app(c: &State<Config>) -> Result<NamedFile, Problem> {
    app_index_file(c).await
}

/// Static web client files. Unknown paths get the client's index so its
/// router can handle them; unknown API paths stay 404.
#[get("/<path..>", rank = 10)]
pub async fn app_path(path: PathBuf, c: &State<Config>) -> Result<NamedFile, Problem> {
    if path.starts_with("api") {
        return Err(Problem::new_untyped(Status::NotFound, "Resource doesn't exist."));
    }

    match NamedFile::open(c.public_content.join(&path)).await {
        Ok(file) => Ok(file),
        Err(_) => app_index_file(c).await,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rocket::http::Status;
    use rocket::local::asynchronous::Client;

    use crate::config::Config;
    use crate::route::files::{app, app_path};

    async fn client(public: &std::path::Path) -> Client {
        let mut config = Config::default();
        config.public_content = public.to_path_buf();
        let rocket = rocket::build()
            .manage(config)
            .mount("/", routes![app, app_path]);
        Client::untracked(rocket).await.expect("valid rocket instance")
    }

    #[rocket::async_test]
    async fn client_routes_fall_back_to_index() {
        let public = tempfile::tempdir().unwrap();
        fs::write(public.path().join("index.html"), "<html>tempo</html>").unwrap();
        fs::write(public.path().join("app.js"), "console.log(1)").unwrap();
        let client = client(public.path()).await;

        let asset = client.get("/app.js").dispatch().await;
        assert_eq!(asset.into_string().await.as_deref(), Some("console.log(1)"));

        let deep_link = client.get("/batches/42").dispatch().await;
        assert_eq!(deep_link.status(), Status::Ok);
        assert_eq!(deep_link.into_string().await.as_deref(), Some("<html>tempo</html>"));

        let api = client.get("/api/nothing").dispatch().await;
        assert_eq!(api.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn missing_client_is_not_found() {
        let public = tempfile::tempdir().unwrap();
        let client = client(public.path()).await;

        let response = client.get("/").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
    }
}
