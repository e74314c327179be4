//! Concurrency smoke test against a running server.
//!
//! Registers N students, pays and approves each, then fires all their
//! votes at one poll simultaneously and checks that the tally comes back
//! as exactly N.

use clap::Parser;
use reqwest::Client;
use serde_json::{Value, json};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server base URL.
    #[arg(long, default_value = "http://localhost:1111")]
    base_url: String,

    /// Number of concurrent voters.
    #[arg(long, default_value_t = 24)]
    voters: u32,

    /// Admin credentials (must match VOTE_ADMIN_EMAIL on the server).
    #[arg(long, default_value = "admin@naotems.edu")]
    admin_email: String,

    #[arg(long, default_value = "hunter22")]
    admin_password: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let client = Client::new();

    let admin_token = admin_token(&client, &args).await;

    let poll: Value = post_json(
        &client,
        &format!("{}/polls", args.base_url),
        &admin_token,
        &json!({
            "title": "Load test poll",
            "candidates": [{ "name": "Ada" }, { "name": "Bayo" }]
        }),
    )
    .await;
    let poll_id = poll["id"].as_str().expect("poll id").to_string();
    println!("Created poll {poll_id}");

    let run = std::process::id();
    let mut tokens = Vec::new();
    for i in 0..args.voters {
        let session: Value = post_json(
            &client,
            &format!("{}/auth/signup", args.base_url),
            "",
            &json!({
                "email": format!("load-{run}-{i}@naotems.edu"),
                "password": "hunter22",
                "matric_number": format!("LOAD/{run}/{i}")
            }),
        )
        .await;
        let token = session["token"].as_str().expect("token").to_string();

        let payment: Value = post_json(
            &client,
            &format!("{}/payments", args.base_url),
            &token,
            &json!({ "proof_ref": "load-test.png" }),
        )
        .await;
        let payment_id = payment["id"].as_str().expect("payment id");

        post_json(
            &client,
            &format!("{}/payments/{payment_id}/status", args.base_url),
            &admin_token,
            &json!({ "status": "approved" }),
        )
        .await;

        tokens.push(token);
    }
    println!("Registered and approved {} voters", args.voters);

    let mut handles = Vec::new();
    for (i, token) in tokens.into_iter().enumerate() {
        let client = client.clone();
        let url = format!("{}/polls/{poll_id}/vote", args.base_url);
        let candidate = if i % 2 == 0 { 1 } else { 2 };
        handles.push(tokio::spawn(async move {
            client
                .post(&url)
                .bearer_auth(&token)
                .json(&json!({ "candidate_id": candidate }))
                .send()
                .await
                .expect("vote request")
                .status()
                .is_success()
        }));
    }

    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap() {
            ok += 1;
        }
    }

    let polls: Value = client
        .get(format!("{}/polls", args.base_url))
        .bearer_auth(&admin_token)
        .send()
        .await
        .expect("list polls")
        .json()
        .await
        .expect("polls body");
    let total = polls
        .as_array()
        .and_then(|list| list.iter().find(|p| p["id"] == json!(poll_id)))
        .and_then(|p| p["total_votes"].as_u64())
        .expect("poll in listing");

    println!("Accepted votes: {ok}, recorded tally: {total}");
    assert_eq!(ok as u64, total, "lost or duplicated updates detected");
    assert_eq!(ok, args.voters, "not every eligible vote was accepted");
    println!("OK: every concurrent vote counted exactly once");
}

async fn admin_token(client: &Client, args: &Args) -> String {
    let signup = client
        .post(format!("{}/auth/signup", args.base_url))
        .json(&json!({
            "email": args.admin_email,
            "password": args.admin_password,
            "matric_number": "STAFF/1"
        }))
        .send()
        .await
        .expect("admin signup request");

    let session: Value = if signup.status().is_success() {
        signup.json().await.expect("signup body")
    } else {
        // Already registered from a previous run.
        client
            .post(format!("{}/auth/login", args.base_url))
            .json(&json!({
                "email": args.admin_email,
                "password": args.admin_password
            }))
            .send()
            .await
            .expect("admin login request")
            .json()
            .await
            .expect("login body")
    };

    session["token"].as_str().expect("admin token").to_string()
}

async fn post_json(client: &Client, url: &str, token: &str, body: &Value) -> Value {
    let mut request = client.post(url).json(body);
    if !token.is_empty() {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.expect("request");
    let status = response.status();
    let text = response.text().await.expect("body");
    if !status.is_success() {
        panic!("{url} failed with {status}: {text}");
    }
    serde_json::from_str(&text).expect("json body")
}
