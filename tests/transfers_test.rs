mod common;

use anyhow::Result;
use common::{flaky_service, memory_service};
use flashcore::application::LedgerError;
use flashcore::domain::Balances;
use std::time::Duration;

#[tokio::test]
async fn test_transfer_moves_wallet_credits() -> Result<()> {
    let service = memory_service();
    service.create_profile("sender", "g1").await?;
    service.create_profile("receiver", "g1").await?;

    let receipt = service.transfer("sender", "receiver", "g1", 200).await?;
    assert_eq!(receipt.amount, 200);
    assert_eq!(receipt.sender, Balances { wallet: 300, bank: 500 });
    assert_eq!(receipt.receiver, Balances { wallet: 700, bank: 500 });

    let sender = service.get_profile("sender", "g1").await?.unwrap();
    let receiver = service.get_profile("receiver", "g1").await?.unwrap();
    assert_eq!(sender.wallet, 300);
    assert_eq!(receiver.wallet, 700);
    assert_eq!(sender.wallet + receiver.wallet, 1000);

    Ok(())
}

#[tokio::test]
async fn test_transfer_to_self_is_rejected() -> Result<()> {
    let service = memory_service();
    service.create_profile("u1", "g1").await?;

    let result = service.transfer("u1", "u1", "g1", 100).await;
    assert!(matches!(result, Err(LedgerError::SelfTransferNotAllowed)));

    let profile = service.get_profile("u1", "g1").await?.unwrap();
    assert_eq!(profile.balances(), Balances { wallet: 500, bank: 500 });

    Ok(())
}

#[tokio::test]
async fn test_transfer_to_missing_receiver_is_rejected() -> Result<()> {
    let service = memory_service();
    service.create_profile("u1", "g1").await?;

    let result = service.transfer("u1", "nobody", "g1", 100).await;
    match result {
        Err(LedgerError::ProfileNotFound(key)) => assert!(key.ends_with("nobody_g1")),
        other => panic!("expected ProfileNotFound, got {:?}", other),
    }

    // Receiver is not created implicitly and the sender keeps everything
    assert!(service.get_profile("nobody", "g1").await?.is_none());
    let sender = service.get_profile("u1", "g1").await?.unwrap();
    assert_eq!(sender.wallet, 500);

    Ok(())
}

#[tokio::test]
async fn test_transfer_across_guilds_needs_receiver_in_same_guild() -> Result<()> {
    let service = memory_service();
    service.create_profile("u1", "g1").await?;
    service.create_profile("u2", "g2").await?;

    let result = service.transfer("u1", "u2", "g1", 100).await;
    assert!(matches!(result, Err(LedgerError::ProfileNotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_transfer_from_missing_sender_is_rejected() -> Result<()> {
    let service = memory_service();
    service.create_profile("u2", "g1").await?;

    let result = service.transfer("nobody", "u2", "g1", 100).await;
    assert!(matches!(result, Err(LedgerError::ProfileNotFound(_))));

    let receiver = service.get_profile("u2", "g1").await?.unwrap();
    assert_eq!(receiver.wallet, 500);

    Ok(())
}

#[tokio::test]
async fn test_transfer_more_than_wallet_is_rejected() -> Result<()> {
    let service = memory_service();
    service.create_profile("u1", "g1").await?;
    service.create_profile("u2", "g1").await?;

    // Bank credits do not count towards a transfer
    let result = service.transfer("u1", "u2", "g1", 501).await;
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientWalletFunds { .. })
    ));

    let u1 = service.get_profile("u1", "g1").await?.unwrap();
    let u2 = service.get_profile("u2", "g1").await?.unwrap();
    assert_eq!(u1.balances(), Balances { wallet: 500, bank: 500 });
    assert_eq!(u2.balances(), Balances { wallet: 500, bank: 500 });

    Ok(())
}

#[tokio::test]
async fn test_failed_credit_refunds_sender() -> Result<()> {
    let (service, flaky) = flaky_service();
    service.create_profile("u1", "g1").await?;
    service.create_profile("u2", "g1").await?;

    // Every credit attempt on the receiver fails
    flaky.fail_updates("u2_g1", 100);

    let result = service.transfer("u1", "u2", "g1", 200).await;
    assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));

    let u1 = service.get_profile("u1", "g1").await?.unwrap();
    let u2 = service.get_profile("u2", "g1").await?.unwrap();
    assert_eq!(u1.wallet, 500);
    assert_eq!(u2.wallet, 500);

    Ok(())
}

#[tokio::test]
async fn test_refund_keeps_retrying_past_the_retry_budget() -> Result<()> {
    let (service, flaky) = flaky_service();
    service.create_profile("u1", "g1").await?;
    service.create_profile("u2", "g1").await?;

    flaky.fail_updates("u2_g1", 100);
    // The debit goes through, then the next 7 updates of the sender fail.
    // With 3 attempts per store call the first two refund rounds give up.
    flaky.fail_updates_after("u1_g1", 1, 7);

    let result = service.transfer("u1", "u2", "g1", 200).await;
    assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));

    let u1 = service.get_profile("u1", "g1").await?.unwrap();
    assert_eq!(u1.wallet, 500);
    assert!(flaky.failures_injected() >= 7 + 3);

    Ok(())
}

#[tokio::test]
async fn test_transient_failures_within_budget_are_invisible() -> Result<()> {
    let (service, flaky) = flaky_service();
    service.create_profile("u1", "g1").await?;
    service.create_profile("u2", "g1").await?;

    flaky.fail_updates("u1_g1", 2);
    flaky.fail_updates("u2_g1", 2);

    let receipt = service.transfer("u1", "u2", "g1", 50).await?;
    assert_eq!(receipt.sender.wallet, 450);
    assert_eq!(receipt.receiver.wallet, 550);
    assert_eq!(flaky.failures_injected(), 4);

    Ok(())
}

#[tokio::test]
async fn test_store_outage_on_withdraw_changes_nothing() -> Result<()> {
    let (service, flaky) = flaky_service();
    service.create_profile("u1", "g1").await?;

    flaky.fail_updates("u1_g1", 3);

    let result = service.withdraw("u1", "g1", 100).await;
    match result {
        Err(LedgerError::StoreUnavailable(reason)) => {
            assert!(reason.contains("gave up after 3 attempts"))
        }
        other => panic!("expected StoreUnavailable, got {:?}", other),
    }

    let profile = service.get_profile("u1", "g1").await?.unwrap();
    assert_eq!(profile.balances(), Balances { wallet: 500, bank: 500 });

    Ok(())
}

#[tokio::test]
async fn test_refund_stops_when_sender_profile_is_gone() -> Result<()> {
    let (service, flaky) = flaky_service();
    service.create_profile("u1", "g1").await?;
    service.create_profile("u2", "g1").await?;

    // The credit keeps failing and the sender disappears meanwhile
    flaky.fail_updates("u2_g1", 100);
    flaky.delete_on_failure("u2_g1", "u1_g1");

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        service.transfer("u1", "u2", "g1", 100),
    )
    .await
    .expect("transfer must return once the refund cannot be applied");
    assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));

    assert!(service.get_profile("u1", "g1").await?.is_none());
    let u2 = service.get_profile("u2", "g1").await?.unwrap();
    assert_eq!(u2.wallet, 500);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_transfer_still_settles() -> Result<()> {
    let (service, flaky) = flaky_service();
    service.create_profile("u1", "g1").await?;
    service.create_profile("u2", "g1").await?;

    flaky.delay_updates("u2_g1", Duration::from_millis(100));

    // Stop waiting while the credit is still held up
    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        service.transfer("u1", "u2", "g1", 100),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;

    let u1 = service.get_profile("u1", "g1").await?.unwrap();
    let u2 = service.get_profile("u2", "g1").await?.unwrap();
    assert_eq!(u1.wallet + u2.wallet, 1000);
    assert_eq!(u1.wallet, 400);
    assert_eq!(u2.wallet, 600);

    Ok(())
}
