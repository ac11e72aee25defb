//! Retirement semantics across channels and alternations.

mod common;

use std::time::Duration;

use alting::{read_any, CancelToken, Channel, Deadline, ErrorKind, Lifecycle, Priority};
use common::init_logging;

#[test]
fn retirement_resolves_every_in_flight_request() {
    init_logging();
    alting::test_phase!("retirement_resolves_every_in_flight_request");
    let read_chans: Vec<_> = (0..3).map(|_| Channel::<i32>::rendezvous()).collect();
    let write_chans: Vec<_> = (0..3).map(|_| Channel::<i32>::rendezvous()).collect();
    let reads: Vec<_> = read_chans.iter().map(Channel::read).collect();
    let writes: Vec<_> = write_chans.iter().map(|c| c.write(1)).collect();
    let chans: Vec<_> = read_chans.into_iter().chain(write_chans).collect();
    for chan in &chans {
        chan.retire_immediate();
    }
    for op in reads {
        assert_eq!(op.wait().expect_err("retired").kind(), ErrorKind::Retired);
    }
    for op in writes {
        assert_eq!(op.wait().expect_err("retired").kind(), ErrorKind::Retired);
    }
    for chan in &chans {
        let probe = chan.probe();
        assert_eq!(probe.state, Lifecycle::Retired);
        assert_eq!(probe.pending_readers, 0);
        assert_eq!(probe.pending_writers, 0);
        assert_eq!(probe.buffered, 0);
    }
    alting::test_complete!("retirement_resolves_every_in_flight_request");
}

#[test]
fn draining_retire_pairs_queued_work_first() {
    init_logging();
    // A queued reader and a concurrent writer-side drain: the reader that
    // was already waiting is served before the channel goes down.
    let chan = Channel::<i32>::rendezvous();
    let read = chan.read();
    let writer = {
        let chan = chan.clone();
        std::thread::spawn(move || chan.write(9).wait())
    };
    // Give the writer a moment to pair.
    std::thread::sleep(Duration::from_millis(30));
    chan.retire();
    assert_eq!(read.wait().expect("paired before retirement"), 9);
    writer
        .join()
        .expect("writer panicked")
        .expect("write paired");
    assert_eq!(chan.probe().state, Lifecycle::Retired);
}

#[test]
fn retire_is_idempotent_in_any_combination() {
    init_logging();
    let chan = Channel::<i32>::buffered(2);
    chan.retire();
    chan.retire();
    chan.retire_immediate();
    chan.retire();
    assert_eq!(chan.probe().state, Lifecycle::Retired);
}

#[test]
fn requests_after_retirement_fail_immediately() {
    init_logging();
    let chan = Channel::<i32>::buffered(1);
    chan.retire();
    assert_eq!(
        chan.read().wait().expect_err("refused").kind(),
        ErrorKind::Retired
    );
    assert_eq!(
        chan.write(1).wait().expect_err("refused").kind(),
        ErrorKind::Retired
    );
    assert_eq!(
        chan.read_before(Deadline::after(Duration::from_secs(5)))
            .wait()
            .expect_err("refused, not timed out")
            .kind(),
        ErrorKind::Retired
    );
}

#[test]
fn alt_survives_partial_retirement_and_reports_full_retirement() {
    init_logging();
    alting::test_phase!("alt_survives_partial_retirement_and_reports_full_retirement");
    let a = Channel::<i32>::rendezvous();
    let b = Channel::<i32>::rendezvous();
    let op = alting::Alt::new().read(&a).read(&b).post().expect("valid");
    // Retiring one candidate leaves the alt live on the other.
    a.retire();
    std::thread::sleep(Duration::from_millis(20));
    assert!(!op.is_complete(), "alt failed although b is still open");
    // A write on the survivor commits normally.
    let writer = {
        let b = b.clone();
        std::thread::spawn(move || b.write(5).wait())
    };
    let selection = op.wait().expect("b still pairs");
    assert_eq!(selection.channel, b.id());
    assert_eq!(selection.into_value::<i32>(), Some(5));
    writer
        .join()
        .expect("writer panicked")
        .expect("write paired");
    alting::test_complete!("alt_survives_partial_retirement_and_reports_full_retirement");
}

#[test]
fn retirement_storm_reports_retired_not_timeout() {
    init_logging();
    let channels: Vec<_> = (0..4).map(|_| Channel::<i32>::rendezvous()).collect();
    let handle = {
        let channels = channels.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            for chan in channels {
                chan.retire();
            }
        })
    };
    let err = read_any(
        &channels,
        Priority::First,
        Deadline::after(Duration::from_secs(10)),
    )
    .expect_err("everything retired");
    assert_eq!(err.kind(), ErrorKind::Retired);
    handle.join().expect("retirer panicked");
}

#[test]
fn cancelled_request_does_not_block_retirement() {
    init_logging();
    let chan = Channel::<i32>::rendezvous();
    let token = CancelToken::new();
    let op = chan.read_request(Deadline::never(), Some(&token));
    token.cancel();
    assert_eq!(
        op.wait().expect_err("cancelled").kind(),
        ErrorKind::Cancelled
    );
    chan.retire();
    assert_eq!(chan.probe().state, Lifecycle::Retired);
    assert_eq!(chan.probe().pending_readers, 0);
}
