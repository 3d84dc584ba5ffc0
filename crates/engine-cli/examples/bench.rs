use std::time::Instant;

#[tokio::main]
async fn main() {
    let n: usize = std::env::var("N").ok().and_then(|v| v.parse().ok()).unwrap_or(16);
    let tenant_id = std::env::var("TENANT_ID").unwrap_or_else(|_| "bench".into());
    let prompt = std::env::var("PROMPT").unwrap_or_else(|_| "Hello".into());
    let tokens_requested: i64 = std::env::var("TOKENS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(128);
    let priority_bid: i32 = std::env::var("PRIORITY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5);
    let url = std::env::var("URL").unwrap_or_else(|_| "http://127.0.0.1:8080".into());

    let client = reqwest::Client::new();
    let register_body = serde_json::json!({
        "tenant_id": tenant_id,
        "rate": n as f64 * 10.0,
        "burst_cap": n as f64 * 10.0,
    });
    let _ = client
        .post(format!("{url}/tenant"))
        .json(&register_body)
        .send()
        .await;

    let start = Instant::now();
    let mut tasks = Vec::new();
    for _ in 0..n {
        let c = client.clone();
        let u = url.clone();
        let body = serde_json::json!({
            "tenant_id": tenant_id,
            "prompt": prompt,
            "tokens_requested": tokens_requested,
            "priority_bid": priority_bid,
        });
        tasks.push(tokio::spawn(async move {
            let _ = c.post(format!("{u}/submit")).json(&body).send().await.ok();
        }));
    }
    for t in tasks {
        let _ = t.await;
    }
    println!("completed {} requests in {:.2}s", n, start.elapsed().as_secs_f32());
}
