use anyhow::Context;
use bottleneck_driver::Session;
use clap::Parser;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let session = Session::parse();
    let config = session.config().context("failed to read the experiment")?;
    let backend = session.backend()?;
    let report = bottleneck_driver::run(config, &backend).context("experiment failed")?;
    for flow in &report.flows {
        if let Some(s) = report.summary_of(flow.id) {
            println!(
                "flow {}: {} -> {}, {} sent, {} received, {}",
                flow.id, s.src, s.dst, s.tx_bytes, s.rx_bytes, s.throughput
            );
        }
    }
    println!("Results are in {}", report.output_dir.display());
    Ok(())
}
