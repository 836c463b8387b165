use std::fs;

use bottleneck_core::{
    config::FlowConfig,
    link::{EdgeLinks, LinkSpec},
    topology::DumbbellSpec,
    units::{BitsPerSec, Mbps, Millisecs, Secs},
    Experiment, ExperimentConfig, FlowId,
};
use engine_impls::FluidEngine;

fn two_by_two(edges: EdgeLinks) -> DumbbellSpec {
    DumbbellSpec::builder()
        .left_count(2)
        .right_count(2)
        .bottleneck(LinkSpec::new(Mbps::new(10), Millisecs::new(10)))
        .left_links(edges.clone())
        .right_links(edges)
        .build()
}

#[test]
fn two_flows_share_the_bottleneck() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let edge = LinkSpec::new(Mbps::new(1000), Millisecs::new(5));
    let mut cfg = ExperimentConfig::builder()
        .topology(two_by_two(EdgeLinks::Uniform(edge)))
        .flows(FlowConfig::builder().count(2).build())
        .stop_time(Secs::new(10))
        .build();
    cfg.output.dir = dir.path().to_path_buf();
    let report = Experiment::new(cfg).run(FluidEngine::default())?;

    for flow in [FlowId::ZERO, FlowId::ONE] {
        let series = fs::read_to_string(dir.path().join(format!("throughput-{flow}.dat")))?;
        assert!(series.lines().count() > 0, "no samples for flow {flow}");
        let summary = report.summary_of(flow).unwrap();
        assert!(summary.throughput > BitsPerSec::ZERO);
        assert!(summary.throughput < Mbps::new(10).into());
    }
    let total = report
        .summaries
        .iter()
        .filter(|s| s.flow.is_some())
        .map(|s| s.rx_bytes.into_f64() * 8.0 / 10.0)
        .sum::<f64>();
    assert!(total < 10e6, "{total}");
    assert!(total > 8e6, "{total}");
    assert!(fs::read_to_string(dir.path().join("queue-size.dat"))?.lines().count() > 0);
    assert_eq!(report.skipped_samples, 0);
    Ok(())
}

#[test]
fn shorter_rtt_gets_more() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let edges = EdgeLinks::PerFlow(vec![
        LinkSpec::new(Mbps::new(1000), Millisecs::new(5)),
        LinkSpec::new(Mbps::new(1000), Millisecs::new(25)),
    ]);
    let mut cfg = ExperimentConfig::builder()
        .topology(two_by_two(edges))
        .flows(FlowConfig::builder().count(2).build())
        .stop_time(Secs::new(20))
        .build();
    cfg.output.dir = dir.path().to_path_buf();
    cfg.telemetry.cwnd = false;
    cfg.telemetry.queue = false;
    let report = Experiment::new(cfg).run(FluidEngine::default())?;
    let near = report.summary_of(FlowId::ZERO).unwrap().throughput;
    let far = report.summary_of(FlowId::ONE).unwrap().throughput;
    assert!(near > far, "{near} <= {far}");
    Ok(())
}
