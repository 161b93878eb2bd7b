use std::time::Duration;

use color_eyre::Result;
use common::*;
use pretty_assertions::assert_eq;
use uart_bridge::reactor::Limits;

mod common;

fn limits(max_clients: usize) -> Limits {
    Limits {
        max_clients,
        ..Default::default()
    }
}

#[tokio::test]
async fn connection_beyond_capacity_is_closed() -> Result<()> {
    let mut harness = start_bridge_with_limits(limits(2)).await?;
    let mut clients = connect_registered(&mut harness, 2).await?;

    let mut extra = connect(harness.port).await?;
    assert!(is_closed(&mut extra).await);

    // The admitted clients are unaffected.
    send(&mut harness.device, b"still here").await?;
    for client in clients.iter_mut() {
        assert_eq!(receive(client, 10).await?, b"still here");
    }

    Ok(())
}

#[tokio::test]
async fn default_capacity_is_ten() -> Result<()> {
    let mut harness = start_bridge().await?;
    let _clients = connect_registered(&mut harness, 10).await?;

    let mut extra = connect(harness.port).await?;
    assert!(is_closed(&mut extra).await);

    Ok(())
}

#[tokio::test]
async fn disconnecting_client_does_not_disturb_others() -> Result<()> {
    let mut harness = start_bridge().await?;
    let mut clients = connect_registered(&mut harness, 3).await?;

    drop(clients.remove(1));
    tokio::time::sleep(Duration::from_millis(100)).await;

    send(&mut harness.device, b"after").await?;

    assert_eq!(receive(&mut harness.gui, 5).await?, b"after");
    for client in clients.iter_mut() {
        assert_eq!(receive(client, 5).await?, b"after");
    }

    Ok(())
}

#[tokio::test]
async fn freed_slot_can_be_taken_by_a_new_client() -> Result<()> {
    let mut harness = start_bridge_with_limits(limits(2)).await?;
    let mut clients = connect_registered(&mut harness, 2).await?;

    drop(clients.remove(0));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut newcomer = connect(harness.port).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    send(&mut harness.device, b"welcome").await?;

    assert_eq!(receive(&mut newcomer, 7).await?, b"welcome");
    assert_eq!(receive(&mut clients[0], 7).await?, b"welcome");

    Ok(())
}

#[tokio::test]
async fn client_hanging_up_mid_stream_is_dropped_quietly() -> Result<()> {
    let mut harness = start_bridge().await?;
    let mut clients = connect_registered(&mut harness, 2).await?;

    let leaving = clients.remove(0);
    drop(leaving);

    // Keep the serial line busy while the departure is noticed.
    for _ in 0..20 {
        send(&mut harness.device, b"tick").await?;
        assert_eq!(receive(&mut clients[0], 4).await?, b"tick");
        assert_eq!(receive(&mut harness.gui, 4).await?, b"tick");
    }

    assert!(is_running(&mut harness));

    Ok(())
}

#[tokio::test]
async fn client_writes_after_reconnect_reach_serial() -> Result<()> {
    let mut harness = start_bridge_with_limits(limits(1)).await?;

    let first = connect_registered(&mut harness, 1).await?;
    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut second = connect(harness.port).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    send(&mut second, b"again").await?;
    assert_eq!(receive(&mut harness.device, 5).await?, b"again");

    Ok(())
}
