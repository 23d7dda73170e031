//! Isolated training worker: one request on stdin, one response on stdout.

use anyhow::Context;

fn main() -> anyhow::Result<()> {
    subset_ensemble::logging::init_tracing();
    let stdin = std::io::stdin().lock();
    let stdout = std::io::stdout().lock();
    subset_ensemble::trainer::worker::serve(stdin, stdout)
        .context("subset-worker could not complete the request")?;
    Ok(())
}
