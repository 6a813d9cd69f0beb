use std::env;

fn main() {
    // TEQUEUE_MAX_TIMEOUT_US, the longest single wait of the dispatch
    // thread, defaults to 10 seconds
    println!("cargo:rerun-if-env-changed=TEQUEUE_MAX_TIMEOUT_US");
    let max_timeout = env::var("TEQUEUE_MAX_TIMEOUT_US")
        .unwrap_or("10000000".to_owned());
    println!("cargo:rustc-env=TEQUEUE_MAX_TIMEOUT_US={}", max_timeout);

    // TEQUEUE_RETRY_INTERVAL_MS, the source's backoff between polls,
    // defaults to 100 milliseconds
    println!("cargo:rerun-if-env-changed=TEQUEUE_RETRY_INTERVAL_MS");
    let retry_interval = env::var("TEQUEUE_RETRY_INTERVAL_MS")
        .unwrap_or("100".to_owned());
    println!("cargo:rustc-env=TEQUEUE_RETRY_INTERVAL_MS={}", retry_interval);
}
