use std::{env, sync::Arc};

use backend_platform::AuthStore;
use backend_rest::{
    AuthenticatedClient, ChatApi, DEFAULT_PAGE_SIZE, EndpointConfig, HealthProbe, HttpTransport,
    ReqwestTransport, SessionApi,
};

#[tokio::main]
async fn main() {
    let endpoints = match EndpointConfig::from_env() {
        Ok(endpoints) => endpoints,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(2);
        }
    };
    let transport: Arc<dyn HttpTransport> = match ReqwestTransport::new(endpoints.clone()) {
        Ok(transport) => Arc::new(transport),
        Err(err) => {
            eprintln!("Failed to build HTTP client: {err}");
            std::process::exit(1);
        }
    };

    let probe = HealthProbe::new(transport.clone(), endpoints.health_timeout);
    if let Err(err) = probe.check(None).await {
        eprintln!("Health probe against {} failed: {err}", endpoints.base_url());
        std::process::exit(1);
    }
    println!("API at {} is reachable.", endpoints.base_url());

    let (Ok(email), Ok(password)) = (env::var("BOARDCHAT_EMAIL"), env::var("BOARDCHAT_PASSWORD"))
    else {
        println!("Set BOARDCHAT_EMAIL and BOARDCHAT_PASSWORD to run the live auth smoke.");
        return;
    };

    let auth = AuthStore::in_memory();
    if let Err(err) = SessionApi::new(transport.clone(), auth.clone())
        .login(&email, &password)
        .await
    {
        eprintln!("Login failed: {err}");
        std::process::exit(1);
    }
    println!("Logged in as {email}.");

    let client = AuthenticatedClient::new(transport, auth);
    if let Err(err) = client.reissuer().reissue().await {
        eprintln!("Token reissue failed: {err}");
        std::process::exit(1);
    }
    println!("Access token reissued.");

    match ChatApi::new(client).my_rooms(0, DEFAULT_PAGE_SIZE, None).await {
        Ok(page) => println!("First page lists {} of my room(s).", page.rooms.len()),
        Err(err) => {
            eprintln!("Listing rooms failed: {err}");
            std::process::exit(1);
        }
    }
}
