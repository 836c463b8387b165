use std::cell::RefCell;
use std::rc::Rc;

use bottleneck_core::{
    config::Pacing,
    flows::{FlowProvisioner, Protocol},
    link::LinkSpec,
    topology::{DumbbellSpec, Side},
    units::{Mbps, Secs},
};

use super::*;

fn dumbbell(left: usize, right: usize) -> anyhow::Result<Topology> {
    let edge = LinkSpec::new(Mbps::new(1000), Millisecs::new(5));
    let topo = DumbbellSpec::builder()
        .left_count(left)
        .right_count(right)
        .bottleneck(LinkSpec::new(Mbps::new(10), Millisecs::new(10)))
        .left_links(edge)
        .right_links(edge)
        .build()
        .build()?;
    Ok(topo)
}

/// An engine with the topology installed, routes computed and `n` flows running until `stop`.
fn running(
    stack: StackConfig,
    n: usize,
    stop: Nanosecs,
) -> anyhow::Result<(FluidEngine, Topology, Vec<FlowDescriptor>)> {
    let topo = dumbbell(n, n)?;
    let mut engine = FluidEngine::new();
    engine.configure_stack(&stack, &QueueConfig::default())?;
    engine.install_topology(&topo)?;
    engine.compute_routes()?;
    let flows =
        FlowProvisioner::default().provision(&topo, n, Protocol::Tcp, Nanosecs::ZERO, stop)?;
    for f in &flows {
        engine.install_sink(f)?;
        engine.install_bulk_sender(f)?;
    }
    Ok((engine, topo, flows))
}

fn data_counters(engine: &FluidEngine, flow: &FlowDescriptor) -> FlowCounters {
    engine
        .flow_counters()
        .into_iter()
        .find(|c| c.key.any_src_port() == flow.key())
        .unwrap()
}

#[test]
fn callbacks_run_in_order() -> anyhow::Result<()> {
    type Log = Rc<RefCell<Vec<(Nanosecs, &'static str)>>>;
    let log = Log::default();
    let mut engine = FluidEngine::new();
    let push = |engine: &mut FluidEngine, ms: u64, tag: &'static str| {
        let log = Rc::clone(&log);
        engine.schedule_at(
            Millisecs::new(ms).into(),
            Box::new(move |e: &mut FluidEngine| {
                log.borrow_mut().push((e.now(), tag));
                Ok(())
            }),
        );
    };
    push(&mut engine, 5, "b");
    push(&mut engine, 20, "late");
    push(&mut engine, 5, "c");
    {
        let log = Rc::clone(&log);
        engine.schedule_at(
            Millisecs::new(1).into(),
            Box::new(move |e: &mut FluidEngine| {
                log.borrow_mut().push((e.now(), "a"));
                let log = Rc::clone(&log);
                // Scheduling in the past runs now, after the current callback
                e.schedule_at(
                    Nanosecs::ZERO,
                    Box::new(move |e: &mut FluidEngine| {
                        log.borrow_mut().push((e.now(), "a2"));
                        Ok(())
                    }),
                );
                Ok(())
            }),
        );
    }
    engine.run(Millisecs::new(10).into())?;
    assert_eq!(engine.now(), Millisecs::new(10).into());
    let ms = |n| Nanosecs::from(Millisecs::new(n));
    assert_eq!(
        *log.borrow(),
        vec![(ms(1), "a"), (ms(1), "a2"), (ms(5), "b"), (ms(5), "c")]
    );
    engine.destroy()?;
    assert_eq!(log.borrow().len(), 4);
    Ok(())
}

#[test]
fn single_flow_fills_the_bottleneck() -> anyhow::Result<()> {
    let stop = Secs::new(10).into();
    let (mut engine, topo, flows) = running(StackConfig::default(), 1, stop)?;
    engine.run(Secs::new(5).into())?;
    let egress = topo.bottleneck_egress(Side::Right);
    assert!(engine.queue_len(egress).unwrap() > Packets::ZERO);
    assert!(engine.cwnd(flows[0].id).unwrap() > Bytes::new(14_480));
    engine.run(stop)?;
    // Finished flows have no window
    assert!(engine.cwnd(flows[0].id).is_none());
    let c = data_counters(&engine, &flows[0]);
    let rx_bps = c.rx_bytes.into_f64() * 8.0 / 10.0;
    assert!(rx_bps > 8e6, "rx {rx_bps}");
    assert!(rx_bps < 10e6, "rx {rx_bps}");
    assert!(c.tx_bytes >= c.rx_bytes);
    assert_eq!(c.first_tx, Some(Nanosecs::ZERO));
    assert_eq!(c.last_tx, Some(stop));
    Ok(())
}

#[test]
fn acknowledgments_flow_backwards() -> anyhow::Result<()> {
    let (mut engine, _, flows) = running(StackConfig::default(), 1, Secs::new(1).into())?;
    engine.run(Secs::new(1).into())?;
    let counters = engine.flow_counters();
    assert_eq!(counters.len(), 2);
    let ack = counters
        .iter()
        .find(|c| c.key.src == flows[0].sink_addr())
        .unwrap();
    let data = data_counters(&engine, &flows[0]);
    assert_eq!(ack.key.dst, data.key.src);
    assert!(ack.tx_bytes < data.tx_bytes);
    Ok(())
}

#[test]
fn pacing_caps_the_rate() -> anyhow::Result<()> {
    let stack = StackConfig::builder()
        .pacing(Pacing {
            enabled: true,
            max_rate: Some(Mbps::new(1).into()),
        })
        .build();
    let (mut engine, topo, flows) = running(stack, 1, Secs::new(4).into())?;
    engine.run(Secs::new(4).into())?;
    let c = data_counters(&engine, &flows[0]);
    let tx_bps = c.tx_bytes.into_f64() * 8.0 / 4.0;
    assert!(tx_bps <= 1e6 + 1.0, "tx {tx_bps}");
    assert!(tx_bps > 0.9e6, "tx {tx_bps}");
    assert_eq!(
        engine.queue_len(topo.bottleneck_egress(Side::Right)),
        Some(Packets::ZERO)
    );
    Ok(())
}

#[test]
fn senders_without_sinks_stay_idle() -> anyhow::Result<()> {
    let topo = dumbbell(1, 1)?;
    let mut engine = FluidEngine::new();
    engine.install_topology(&topo)?;
    engine.compute_routes()?;
    let flows = FlowProvisioner::default().provision(
        &topo,
        1,
        Protocol::Quic,
        Nanosecs::ZERO,
        Secs::new(1).into(),
    )?;
    engine.install_bulk_sender(&flows[0])?;
    engine.run(Secs::new(1).into())?;
    assert!(engine.flow_counters().is_empty());
    Ok(())
}

#[test]
fn late_flows_start_late() -> anyhow::Result<()> {
    let topo = dumbbell(1, 1)?;
    let mut engine = FluidEngine::builder().step(Millisecs::new(2)).build();
    engine.install_topology(&topo)?;
    engine.compute_routes()?;
    let flows = FlowProvisioner::builder()
        .timing(vec![bottleneck_core::flows::FlowTiming {
            start: Some(Secs::new(1).into()),
            stop: None,
        }])
        .build()
        .provision(&topo, 1, Protocol::Tcp, Nanosecs::ZERO, Secs::new(2).into())?;
    engine.install_sink(&flows[0])?;
    engine.install_bulk_sender(&flows[0])?;
    engine.run(Millisecs::new(998).into())?;
    assert!(engine.flow_counters().is_empty());
    assert!(engine.cwnd(flows[0].id).is_none());
    engine.run(Secs::new(2).into())?;
    let c = data_counters(&engine, &flows[0]);
    assert_eq!(c.first_tx, Some(Secs::new(1).into()));
    Ok(())
}

#[test]
fn wrong_order_fails() -> anyhow::Result<()> {
    let topo = dumbbell(1, 1)?;
    let flows = FlowProvisioner::default().provision(
        &topo,
        1,
        Protocol::Tcp,
        Nanosecs::ZERO,
        Secs::new(1).into(),
    )?;
    let mut engine = FluidEngine::new();
    assert!(matches!(engine.compute_routes(), Err(EngineError::State(..))));
    engine.install_topology(&topo)?;
    assert!(matches!(
        engine.install_bulk_sender(&flows[0]),
        Err(EngineError::State(..))
    ));
    assert!(matches!(
        engine.configure_stack(&StackConfig::default(), &QueueConfig::default()),
        Err(EngineError::State(..))
    ));
    Ok(())
}
