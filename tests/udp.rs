mod common;

use std::time::Duration;

use anyhow::Result;
use tokio::time::{sleep, timeout};

use bacnet_link::{Address, Pdu, UdpDirector, UdpDirectorOptions};
use common::{Event, Recorder};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn echo_roundtrip_stamps_the_source() -> Result<()> {
    let a_events = Recorder::new();
    let b_events = Recorder::new();

    let mut options = UdpDirectorOptions::new("127.0.0.1:0".parse()?);
    options.observer = a_events.clone();
    let (a, mut a_up) = UdpDirector::bind(options)?;

    let mut options = UdpDirectorOptions::new("127.0.0.1:0".parse()?);
    options.observer = b_events.clone();
    let (b, mut b_up) = UdpDirector::bind(options)?;

    let a_addr = Address::unicast(a.local_addr());
    let b_addr = Address::unicast(b.local_addr());

    a.indication(Pdu::new(&b"\x01\x02"[..]).with_destination(b_addr))?;

    let pdu = timeout(WAIT, b_up.recv()).await?.expect("upstream closed");
    assert_eq!(&pdu.data[..], b"\x01\x02");
    assert_eq!(pdu.source, Some(a_addr));

    // Reply to the observed source and check the reverse stamping.
    b.indication(Pdu::new(&b"\x03"[..]).with_destination(a_addr))?;
    let back = timeout(WAIT, a_up.recv()).await?.expect("upstream closed");
    assert_eq!(&back.data[..], b"\x03");
    assert_eq!(back.source, Some(b_addr));

    // Each director materialized exactly one actor for the other side.
    assert!(a_events.wait_for(WAIT, |e| !e.is_empty()).await);
    assert_eq!(a_events.count(|e| matches!(e, Event::Add(_))), 1);
    assert_eq!(b_events.count(|e| matches!(e, Event::Add(_))), 1);
    Ok(())
}

#[tokio::test]
async fn idle_actors_are_reaped_exactly_once() -> Result<()> {
    let events = Recorder::new();

    let mut options = UdpDirectorOptions::new("127.0.0.1:0".parse()?);
    options.timeout = Some(Duration::from_millis(200));
    options.observer = events.clone();
    let (director, _up) = UdpDirector::bind(options)?;

    let peer = Address::unicast("127.0.0.1:47999".parse()?);
    director.indication(Pdu::new(&b"x"[..]).with_destination(peer))?;

    assert!(
        events
            .wait_for(WAIT, |e| e.iter().any(|e| matches!(e, Event::Add(_))))
            .await
    );
    assert!(director.get_actor(&peer).is_some());

    assert!(
        events
            .wait_for(WAIT, |e| e.iter().any(|e| matches!(e, Event::Del(_))))
            .await
    );
    assert!(director.get_actor(&peer).is_none());

    // No second reap for the same actor.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(events.count(|e| matches!(e, Event::Del(_))), 1);
    Ok(())
}

#[tokio::test]
async fn traffic_postpones_the_idle_reap() -> Result<()> {
    let events = Recorder::new();

    let mut options = UdpDirectorOptions::new("127.0.0.1:0".parse()?);
    options.timeout = Some(Duration::from_millis(300));
    options.observer = events.clone();
    let (director, _up) = UdpDirector::bind(options)?;

    let peer = Address::unicast("127.0.0.1:47998".parse()?);

    // Keep the actor busy for well over one idle period.
    for _ in 0..5 {
        director.indication(Pdu::new(&b"k"[..]).with_destination(peer))?;
        sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(events.count(|e| matches!(e, Event::Del(_))), 0);
    assert!(director.get_actor(&peer).is_some());

    // Silence lets the reaper through.
    assert!(
        events
            .wait_for(WAIT, |e| e.iter().any(|e| matches!(e, Event::Del(_))))
            .await
    );
    assert!(director.get_actor(&peer).is_none());
    Ok(())
}

#[tokio::test]
async fn send_failure_stays_with_the_failing_peer() -> Result<()> {
    let events = Recorder::new();

    let mut options = UdpDirectorOptions::new("127.0.0.1:0".parse()?);
    options.observer = events.clone();
    let (director, _up) = UdpDirector::bind(options)?;

    let sink = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    let good = Address::unicast(sink.local_addr()?);

    let mut buf = [0u8; 64];
    director.indication(Pdu::new(&b"ok"[..]).with_destination(good))?;
    let (n, _) = timeout(WAIT, sink.recv_from(&mut buf)).await??;
    assert_eq!(&buf[..n], b"ok");

    // Port zero is never a valid destination, so this send must fail.
    let bad = Address::unicast("127.0.0.1:0".parse()?);
    director.indication(Pdu::new(&b"boom"[..]).with_destination(bad))?;

    assert!(
        events
            .wait_for(WAIT, |e| {
                e.iter().any(|e| matches!(e, Event::Error(a, _) if *a == bad))
            })
            .await
    );

    // The healthy peer was not disturbed.
    assert_eq!(events.count(|e| matches!(e, Event::Error(a, _) if *a == good)), 0);
    assert!(director.get_actor(&good).is_some());

    director.indication(Pdu::new(&b"still ok"[..]).with_destination(good))?;
    let (n, _) = timeout(WAIT, sink.recv_from(&mut buf)).await??;
    assert_eq!(&buf[..n], b"still ok");
    Ok(())
}

#[tokio::test]
async fn closed_director_rejects_further_work() -> Result<()> {
    let events = Recorder::new();

    let mut options = UdpDirectorOptions::new("127.0.0.1:0".parse()?);
    options.observer = events.clone();
    let (director, _up) = UdpDirector::bind(options)?;

    let peer = Address::unicast("127.0.0.1:47997".parse()?);
    director.indication(Pdu::new(&b"x"[..]).with_destination(peer))?;
    assert!(
        events
            .wait_for(WAIT, |e| e.iter().any(|e| matches!(e, Event::Add(_))))
            .await
    );

    director.close();
    sleep(Duration::from_millis(100)).await;

    assert!(director.get_actor(&peer).is_none());
    assert!(director
        .indication(Pdu::new(&b"y"[..]).with_destination(peer))
        .is_err());
    Ok(())
}

#[tokio::test]
async fn indication_requires_a_destination() -> Result<()> {
    let (director, _up) = UdpDirector::bind(UdpDirectorOptions::new("127.0.0.1:0".parse()?))?;
    assert!(director.indication(Pdu::new(&b"x"[..])).is_err());
    Ok(())
}
