#[tokio::main]
async fn main() {
    ballot::start_server().await;
}
