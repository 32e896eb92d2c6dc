#[cfg(not(feature = "firestore"))]
fn main() {
    eprintln!("tally-scope requires the 'firestore' feature to be enabled");
    eprintln!("Please run with: cargo run --bin tally-scope --features firestore");
    std::process::exit(1);
}

#[cfg(feature = "firestore")]
#[tokio::main(flavor = "current_thread")]
async fn main() {
    use std::rc::Rc;
    use std::time::Duration;

    use tally::firebase_auth::FirebaseAuth;
    use tally::firestore::{DEFAULT_POLL_INTERVAL, FirestoreStore};
    use tally::spawn::TokioLocalSpawner;
    use tally::{CounterConfig, CounterSession, StoreConfig};

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let poll_interval = match args.as_slice() {
        [_] => DEFAULT_POLL_INTERVAL,
        [_, flag, secs] if flag == "--interval" => match secs.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                eprintln!("Error: --interval expects a positive number of seconds, got '{secs}'");
                std::process::exit(1);
            }
        },
        _ => {
            eprintln!("Usage: {} [--interval <seconds>]", args[0]);
            eprintln!();
            eprintln!("Environment:");
            eprintln!("  TALLY_STORE_CONFIG  store config JSON, e.g. {{\"apiKey\":\"...\",\"projectId\":\"...\"}}");
            eprintln!("  TALLY_APP_ID        application namespace (optional)");
            eprintln!("  TALLY_AUTH_TOKEN    custom sign-in token (optional, anonymous otherwise)");
            std::process::exit(1);
        }
    };

    let store_config = match std::env::var("TALLY_STORE_CONFIG") {
        Ok(json) => StoreConfig::from_json(&json).unwrap_or_else(|e| {
            eprintln!("Error: TALLY_STORE_CONFIG is unusable: {e}");
            std::process::exit(1);
        }),
        Err(_) => {
            eprintln!("Error: TALLY_STORE_CONFIG is not set");
            std::process::exit(1);
        }
    };

    let mut config = CounterConfig::new(store_config.clone());
    if let Ok(app_id) = std::env::var("TALLY_APP_ID") {
        config = config.with_app_id(app_id);
    }
    if let Ok(token) = std::env::var("TALLY_AUTH_TOKEN") {
        config = config.with_bootstrap_token(token);
    }

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let spawner = Rc::new(TokioLocalSpawner);

            let auth = match FirebaseAuth::new(&store_config) {
                Ok(auth) => auth,
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            };
            let store = match FirestoreStore::new(&store_config, spawner.clone()) {
                Ok(store) => store.with_auth(auth.clone()).with_poll_interval(poll_interval),
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            };

            println!("TallyScope - live page view counter");
            println!("====================================");
            if let Ok(path) = config.counter_path() {
                println!("Document: {path}");
            }
            println!("Polling every {}s, Ctrl-C to stop", poll_interval.as_secs());
            println!();

            let session = CounterSession::start(config, Rc::new(store), Rc::new(auth), spawner);

            let key = session.counter().subscribe(|value| {
                println!(
                    "[{}] {} views",
                    chrono::Local::now().format("%H:%M:%S"),
                    value.count
                );
            });

            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Could not listen for Ctrl-C: {e}");
            }

            session.counter().unsubscribe(key);
            session.teardown();
            match session.gate().identity() {
                Some(identity) => println!("\nSession {} closed", identity.uid()),
                None => println!("\nSession closed"),
            }
        })
        .await;
}
