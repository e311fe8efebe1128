//! REST stats endpoint with routing.
//!
//! Usage:
//!   cargo run --example rest_server [PORT] [THREADS]
//!   # defaults: port 9080, 2 threads
//!
//!   POST /record/:name/:value?   create or increment a metric
//!   GET  /value/:name            read a metric
//!   GET  /ready                  liveness probe
//!   GET  /auth                   cookie round-trip

use std::sync::{Arc, Mutex};

use shoreline_http::{Code, Cookie, Endpoint, Router};

struct Metric {
    name: String,
    value: i64,
}

impl Metric {
    fn incr(&mut self, n: i64) -> i64 {
        self.value += n;
        self.value
    }
}

fn main() {
    let mut args = std::env::args().skip(1);
    let port: u16 = args
        .next()
        .map(|a| a.parse().expect("invalid port"))
        .unwrap_or(9080);
    let threads: usize = args
        .next()
        .map(|a| a.parse().expect("invalid thread count"))
        .unwrap_or(2);

    eprintln!("cores = {}", shoreline::num_cpus());
    eprintln!("using {threads} threads");

    let metrics: Arc<Mutex<Vec<Metric>>> = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();

    {
        let metrics = metrics.clone();
        router.post("/record/:name/:value?", move |request, response| {
            let name = request.param(":name").unwrap().as_str().to_string();

            let value = if request.has_param(":value") {
                match request.param(":value").unwrap().parse::<i64>() {
                    Ok(value) => value,
                    Err(e) => {
                        let _ = response.send(Code::BadRequest, e.to_string());
                        return;
                    }
                }
            } else {
                1
            };

            let mut metrics = metrics.lock().unwrap();
            match metrics.iter_mut().find(|m| m.name == name) {
                Some(metric) => {
                    let total = metric.incr(value);
                    let _ = response.send(Code::Ok, total.to_string());
                }
                None => {
                    metrics.push(Metric { name, value });
                    let _ = response.send(Code::Created, value.to_string());
                }
            }
        });
    }

    {
        let metrics = metrics.clone();
        router.get("/value/:name", move |request, response| {
            let name = request.param(":name").unwrap().as_str();
            let metrics = metrics.lock().unwrap();
            match metrics.iter().find(|m| m.name == name) {
                Some(metric) => {
                    let _ = response.send(Code::Ok, metric.value.to_string());
                }
                None => {
                    let _ = response.send(Code::NotFound, "Metric does not exist");
                }
            }
        });
    }

    router.get("/ready", |_request, response| {
        let _ = response.send(Code::Ok, "1");
    });

    router.get("/auth", |request, mut response| {
        eprintln!("cookies: [");
        for cookie in request.cookies() {
            eprintln!("    {} = {}", cookie.name, cookie.value);
        }
        eprintln!("]");
        response.cookies().add(Cookie::new("lang", "en-US"));
        let _ = response.send(Code::Ok, "");
    });

    let addr = format!("0.0.0.0:{port}").parse().expect("invalid address");
    let (_shutdown, handles) = match Endpoint::new(addr).threads(threads).serve(router) {
        Ok(launched) => launched,
        Err(e) => {
            eprintln!("failed to start on port {port}: {e}");
            std::process::exit(1);
        }
    };

    eprintln!("listening on 0.0.0.0:{port}");

    for handle in handles {
        if let Err(e) = handle.join().expect("worker thread panicked") {
            eprintln!("worker exited with error: {e:?}");
        }
    }
}
