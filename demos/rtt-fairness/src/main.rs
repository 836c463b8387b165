use std::path::PathBuf;

use clap::Parser;
use itertools::Itertools;

use bottleneck::{
    core::{
        config::FlowConfig,
        link::{EdgeLinks, LinkSpec},
        topology::DumbbellSpec,
        units::{Mbps, Millisecs, Secs},
        Experiment, ExperimentConfig, FlowId,
    },
    impls::FluidEngine,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Edge delay of the first flow's hosts, in ms
    #[arg(long, default_value_t = 5)]
    near: u64,

    /// Edge delay of the second flow's hosts, in ms
    #[arg(long, default_value_t = 25)]
    far: u64,

    /// Bottleneck rate in Mbit/s
    #[arg(short, long, default_value_t = 10)]
    rate: u64,

    /// Experiment length in seconds
    #[arg(short, long, default_value_t = 100)]
    duration: u64,

    #[arg(short, long, default_value = "rtt-fairness")]
    output_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    anyhow::ensure!(args.duration > 0, "duration must be positive");

    // Flow i runs between leaf i on each side, so each flow sees its own edge delay twice
    let edges = EdgeLinks::PerFlow(
        [args.near, args.far]
            .into_iter()
            .map(|ms| LinkSpec::new(Mbps::new(1000), Millisecs::new(ms)))
            .collect(),
    );
    let topology = DumbbellSpec::builder()
        .left_count(2)
        .right_count(2)
        .bottleneck(LinkSpec::new(Mbps::new(args.rate), Millisecs::new(10)))
        .left_links(edges.clone())
        .right_links(edges)
        .symmetric(true)
        .build();
    let mut config = ExperimentConfig::builder()
        .topology(topology)
        .flows(FlowConfig::builder().count(2).build())
        .stop_time(Secs::new(args.duration))
        .build();
    config.output.dir = args.output_dir;

    let report = Experiment::new(config).run(FluidEngine::default())?;

    let (near, far) = [FlowId::ZERO, FlowId::ONE]
        .into_iter()
        .map(|id| {
            report
                .summary_of(id)
                .map(|s| s.throughput)
                .ok_or_else(|| anyhow::anyhow!("no summary for flow {id}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?
        .into_iter()
        .collect_tuple()
        .ok_or_else(|| anyhow::anyhow!("expected two flows"))?;
    println!("{} ms flow: {near}", args.near);
    println!("{} ms flow: {far}", args.far);
    if far.into_u64() == 0 {
        println!("The {} ms flow got no throughput", args.far);
    } else {
        println!("Throughput ratio: {:.2}", near.into_f64() / far.into_f64());
    }
    Ok(())
}
