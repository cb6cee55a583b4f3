mod test_device1;
use test_device1::*;

use usbd_raw_gadget::prelude::*;
use usbd_raw_gadget::{event_type, WorkerExit};

#[test]
fn test_out_endpoint_delivers_to_sink() {
    let ctx = TestCtx::configured();

    assert!(ctx.host.host_send(EP_OUT, b"hello"));
    assert!(ctx.host.host_send(EP_OUT, b"world"));

    assert_eq!(ctx.from_host.recv_timeout(TIMEOUT).expect("data"), b"hello");
    assert_eq!(ctx.from_host.recv_timeout(TIMEOUT).expect("data"), b"world");
}

#[test]
fn test_in_endpoint_sends_source_chunks() {
    let ctx = TestCtx::configured();

    ctx.to_host.send(vec![1, 2, 3]).expect("send");
    ctx.to_host.send(vec![4]).expect("send");

    assert_eq!(ctx.host.host_receive(EP_IN, TIMEOUT), Some(vec![1, 2, 3]));
    assert_eq!(ctx.host.host_receive(EP_IN, TIMEOUT), Some(vec![4]));
}

#[test]
fn test_in_empty_chunk_is_zero_length_packet() {
    let ctx = TestCtx::configured();

    ctx.to_host.send(vec![]).expect("send");
    assert_eq!(ctx.host.host_receive(EP_IN, TIMEOUT), Some(vec![]));
}

#[test]
fn test_in_chunk_split_by_max_transfer() {
    let ctx = TestCtx::configured_with(GadgetConfig::default().with_max_transfer(600));

    let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
    ctx.to_host.send(data.clone()).expect("send");

    let first = ctx.host.host_receive(EP_IN, TIMEOUT).expect("first");
    let second = ctx.host.host_receive(EP_IN, TIMEOUT).expect("second");
    assert_eq!(first.len(), 600);
    assert_eq!(second.len(), 400);
    assert_eq!([first, second].concat(), data);
}

#[test]
fn test_max_transfer_not_below_max_packet() {
    let ctx = TestCtx::configured_with(GadgetConfig::default().with_max_transfer(16));

    ctx.to_host.send(vec![7; 600]).expect("send");

    let first = ctx.host.host_receive(EP_IN, TIMEOUT).expect("first");
    assert_eq!(first.len(), MAX_PACKET as usize);
}

#[test]
fn test_in_write_retried() {
    let ctx = TestCtx::configured_with(GadgetConfig::default().with_write_retries(3));

    ctx.host.fail_writes(EP_IN, 2);
    ctx.to_host.send(vec![9, 9]).expect("send");

    assert_eq!(ctx.host.host_receive(EP_IN, TIMEOUT), Some(vec![9, 9]));
}

#[test]
fn test_in_write_dropped_after_retries() {
    let ctx = TestCtx::configured_with(GadgetConfig::default().with_write_retries(1));

    ctx.host.fail_writes(EP_IN, 2);
    ctx.to_host.send(vec![1]).expect("send");
    ctx.to_host.send(vec![2]).expect("send");

    // first chunk failed twice and was dropped, the worker goes on
    assert_eq!(ctx.host.host_receive(EP_IN, TIMEOUT), Some(vec![2]));
    assert_eq!(ctx.gadget.running_workers(), vec![EP_OUT, EP_IN]);
}

#[test]
fn test_source_done_ends_worker() {
    let ctx = TestCtx::configured();
    let TestCtx {
        host,
        mut gadget,
        to_host,
        ..
    } = ctx;

    drop(to_host);
    wait_for("IN worker to end", || gadget.running_workers() == vec![EP_OUT]);

    // endpoint stays enabled until the configuration goes away
    assert_eq!(gadget.enabled_endpoints(), vec![EP_OUT, EP_IN]);

    let exits = gadget.stop().expect("stop");
    assert!(exits.contains(&(EP_IN, WorkerExit::SourceDone)));
    assert!(exits.contains(&(EP_OUT, WorkerExit::Cancelled)));
    assert!(host.enabled_endpoints().is_empty());
}

#[test]
fn test_workers_run_while_suspended() {
    let mut ctx = TestCtx::configured();

    ctx.host.push_bus_event(event_type::SUSPEND);
    ctx.run();

    ctx.to_host.send(vec![5]).expect("send");
    assert_eq!(ctx.host.host_receive(EP_IN, TIMEOUT), Some(vec![5]));
}

#[test]
fn test_no_data_after_reset() {
    let mut ctx = TestCtx::configured();

    ctx.host.push_bus_event(event_type::RESET);
    ctx.run();

    assert!(!ctx.host.host_send(EP_OUT, b"late"));
    assert!(ctx.from_host.try_recv().is_err());
}

#[test]
fn test_closure_source() {
    use std::time::Duration;
    use usbd_raw_gadget::{CancelToken, Source};

    let mut count: u8 = 0;
    let mut source = move |_cancel: &CancelToken| {
        count += 1;
        if count > 2 {
            None
        } else {
            Some(vec![count])
        }
    };

    let cancel = CancelToken::new();
    assert_eq!(source.next_chunk(&cancel), Some(vec![1]));
    assert_eq!(source.next_chunk(&cancel), Some(vec![2]));
    assert_eq!(source.next_chunk(&cancel), None);

    let (_tx, rx) = crossbeam_channel::unbounded();
    let mut source = ChannelSource::new(rx);
    cancel.cancel();
    let started = std::time::Instant::now();
    assert_eq!(source.next_chunk(&cancel), None);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_stop_with_read_pending() {
    let mut ctx = TestCtx::configured();
    let host = ctx.host.clone();
    wait_for("OUT worker to block", || host.pending_reads(EP_OUT) == 1);

    // the endpoint can't be disabled until the read is woken up
    let exits = ctx.gadget.stop().expect("stop");
    assert_eq!(
        exits,
        vec![(EP_OUT, WorkerExit::Cancelled), (EP_IN, WorkerExit::Cancelled)]
    );
    assert!(ctx.host.enabled_endpoints().is_empty());
    assert_eq!(ctx.host.pending_reads(EP_OUT), 0);
}

#[test]
fn test_reconfigure_with_read_pending() {
    let mut ctx = TestCtx::configured();
    let host = ctx.host.clone();
    wait_for("OUT worker to block", || host.pending_reads(EP_OUT) == 1);

    ctx.host.set_configuration(1);
    ctx.run();
    assert_eq!(ctx.gadget.running_workers(), vec![EP_OUT, EP_IN]);

    assert!(ctx.host.host_send(EP_OUT, b"again"));
    assert_eq!(ctx.from_host.recv_timeout(TIMEOUT).expect("data"), b"again");
}

#[test]
fn test_failed_disable_still_stops_all_workers() {
    let mut ctx = TestCtx::configured();
    ctx.host.refuse_disable(EP_IN);

    let err = ctx.gadget.stop().expect_err("stop");
    assert_eq!(err.errno(), Some(nix::errno::Errno::EIO));

    assert!(ctx.gadget.running_workers().is_empty());
    assert!(ctx.gadget.enabled_endpoints().is_empty());
    // only the refusing endpoint is left behind
    assert_eq!(ctx.host.enabled_endpoints(), vec![EP_IN]);
}
