//! Stock worker program.
//!
//! Serves a small set of demonstration procedures over stdin/stdout.
//! Spawn it from a dispatcher:
//!
//! ```ignore
//! let dispatcher = Dispatcher::builder()
//!     .start(ProcessWorkerFactory::new("taskwire-worker"))?;
//! ```
//!
//! stdout is the frame channel; all logging goes to stderr.

use bytes::Bytes;
use tracing_subscriber::EnvFilter;

use taskwire::codec::MsgPackCodec;
use taskwire::service::{ProcedureRegistry, WorkerService};

fn registry() -> ProcedureRegistry {
    let mut registry = ProcedureRegistry::new();

    registry.register("echo", |args: Bytes, _ctx| async move { Ok(args) });

    registry.register("strlen", |args: Bytes, _ctx| async move {
        let encoded = MsgPackCodec::encode(&(args.len() as u64)).map_err(|e| e.to_string())?;
        Ok(Bytes::from(encoded))
    });

    registry.register("reverse", |args: Bytes, _ctx| async move {
        let text = String::from_utf8(args.to_vec()).map_err(|e| e.to_string())?;
        Ok(Bytes::from(text.chars().rev().collect::<String>()))
    });

    registry.register("sum", |args: Bytes, _ctx| async move {
        let numbers: Vec<i64> = MsgPackCodec::decode(&args).map_err(|e| e.to_string())?;
        let total: i64 = numbers.iter().sum();
        let encoded = MsgPackCodec::encode(&total).map_err(|e| e.to_string())?;
        Ok(Bytes::from(encoded))
    });

    registry.register("sleep_ms", |args: Bytes, _ctx| async move {
        let text = String::from_utf8(args.to_vec()).map_err(|e| e.to_string())?;
        let millis: u64 = text.trim().parse().map_err(|_| {
            format!("sleep_ms expects a decimal millisecond count, got {text:?}")
        })?;
        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
        Ok(Bytes::from_static(b"ok"))
    });

    registry
}

#[tokio::main]
async fn main() -> taskwire::Result<()> {
    // stdout carries frames; logs must stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("taskwire worker starting");

    let service = WorkerService::new(registry());
    service.run(tokio::io::stdin(), tokio::io::stdout()).await?;

    tracing::debug!("dispatcher closed our stdin, exiting");
    Ok(())
}
