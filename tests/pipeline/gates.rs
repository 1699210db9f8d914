use anyhow::Result;
use snapshot_orchestrator::ledger::keys::{
    MAINCHAIN_SIDECHAIN_BALANCE, MAINCHAIN_SNAPSHOT_COMPLETE, MAINCHAIN_SNAPSHOT_HASH,
    MAINCHAIN_SNAPSHOT_TRIGGER, SIDECHAIN_SNAPSHOT_BLOCK_ID, SIDECHAIN_SNAPSHOT_COMPLETE,
    SIDECHAIN_SNAPSHOT_TRIGGER,
};
use snapshot_orchestrator::{LedgerError, SidechainTrigger};

use crate::support::fakes::{block_hash, FakeSidechain, SIDECHAIN_HEIGHT_OFFSET};
use crate::support::helpers::{
    Harness, CONFIRMATION_DEPTH, MAINCHAIN_CONTAINER, SNAPSHOT_HEIGHT,
};

const REFERENCE_TARGET: u64 = SNAPSHOT_HEIGHT + CONFIRMATION_DEPTH - 6;

async fn complete_mainchain(harness: &mut Harness) -> Result<()> {
    harness.mainchain.set_height(SNAPSHOT_HEIGHT);
    harness.sweep().await?;
    harness
        .mainchain
        .set_height(SNAPSHOT_HEIGHT + CONFIRMATION_DEPTH);
    harness.sweep().await?;
    harness.finish_mainchain_dump()?;
    Ok(())
}

fn has_mismatch(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<LedgerError>(),
            Some(LedgerError::CommitmentMismatch { .. })
        )
    })
}

#[tokio::test]
async fn mainchain_gate_waits_captures_and_triggers() -> Result<()> {
    let mut harness = Harness::new()?;

    for height in 995..SNAPSHOT_HEIGHT {
        harness.mainchain.set_height(height);
        let sweep = harness.sweep().await?;
        assert_eq!(sweep.distance, Some(SNAPSHOT_HEIGHT - height));
        assert!(!harness.ledger.is_complete(MAINCHAIN_SNAPSHOT_HASH)?);
        assert!(!harness.ledger.is_complete(MAINCHAIN_SIDECHAIN_BALANCE)?);
    }

    harness.mainchain.set_height(SNAPSHOT_HEIGHT);
    let sweep = harness.sweep().await?;
    assert_eq!(sweep.distance, Some(CONFIRMATION_DEPTH));
    assert_eq!(
        harness.ledger.read_payload(MAINCHAIN_SNAPSHOT_HASH)?,
        Some(block_hash(SNAPSHOT_HEIGHT, 0).to_string())
    );
    assert_eq!(
        harness
            .ledger
            .read_payload(MAINCHAIN_SIDECHAIN_BALANCE)?
            .as_deref(),
        Some("4200000000")
    );

    for height in SNAPSHOT_HEIGHT + 1..SNAPSHOT_HEIGHT + CONFIRMATION_DEPTH {
        harness.mainchain.set_height(height);
        harness.sweep().await?;
        assert!(!harness.ledger.is_complete(MAINCHAIN_SNAPSHOT_TRIGGER)?);
    }
    assert!(harness.containers.events().is_empty());

    harness
        .mainchain
        .set_height(SNAPSHOT_HEIGHT + CONFIRMATION_DEPTH);
    let sweep = harness.sweep().await?;
    assert_eq!(sweep.distance, Some(0));
    assert_eq!(
        harness.ledger.read_payload(MAINCHAIN_SNAPSHOT_TRIGGER)?,
        Some(block_hash(SNAPSHOT_HEIGHT, 0).to_string())
    );
    assert_eq!(
        harness.containers.events(),
        vec![
            format!("stop {MAINCHAIN_CONTAINER}"),
            format!("start {MAINCHAIN_CONTAINER}"),
        ]
    );
    assert!(harness.mainchain.calls().contains(&"getblock".to_owned()));

    // The daemon is still writing its dump.
    harness.sweep().await?;
    assert!(!harness.ledger.is_complete(MAINCHAIN_SNAPSHOT_COMPLETE)?);

    harness.finish_mainchain_dump()?;
    harness.sweep().await?;
    assert!(harness.ledger.is_complete(MAINCHAIN_SNAPSHOT_COMPLETE)?);
    assert!(!harness.containers.is_running(MAINCHAIN_CONTAINER));
    Ok(())
}

#[tokio::test]
async fn syncing_daemon_reports_no_distance_far_from_target() -> Result<()> {
    let mut harness = Harness::new()?;
    harness.mainchain.set_progress(0.5);

    harness.mainchain.set_height(900);
    assert_eq!(harness.sweep().await?.distance, None);

    harness.mainchain.set_height(SNAPSHOT_HEIGHT - 7);
    assert_eq!(harness.sweep().await?.distance, Some(7));
    Ok(())
}

#[tokio::test]
async fn unreachable_mainchain_is_a_wait() -> Result<()> {
    let mut harness = Harness::new()?;
    harness.mainchain.set_height(SNAPSHOT_HEIGHT);
    harness.mainchain.set_reachable(false);

    let sweep = harness.sweep().await?;
    assert_eq!(sweep.completed, 0);
    assert!(!harness.ledger.is_complete(MAINCHAIN_SNAPSHOT_HASH)?);

    harness.mainchain.set_reachable(true);
    harness.sweep().await?;
    assert!(harness.ledger.is_complete(MAINCHAIN_SNAPSHOT_HASH)?);
    Ok(())
}

#[tokio::test]
async fn reorg_before_confirmation_aborts_without_trigger() -> Result<()> {
    let mut harness = Harness::new()?;
    harness.mainchain.set_height(SNAPSHOT_HEIGHT);
    harness.sweep().await?;

    harness.mainchain.reorg(1);
    harness
        .mainchain
        .set_height(SNAPSHOT_HEIGHT + CONFIRMATION_DEPTH);
    let err = harness.sweep().await.expect_err("changed hash must abort");

    assert!(has_mismatch(&err), "{err:#}");
    assert!(format!("{err:#}").contains(".orchestrator_zend_snapshot_hash"));
    assert!(!harness.ledger.is_complete(MAINCHAIN_SNAPSHOT_TRIGGER)?);
    assert!(harness.containers.events().is_empty());
    assert_eq!(
        harness.ledger.read_payload(MAINCHAIN_SNAPSHOT_HASH)?,
        Some(block_hash(SNAPSHOT_HEIGHT, 0).to_string())
    );
    Ok(())
}

#[tokio::test]
async fn sidechain_trigger_waits_for_reference_confirmations() -> Result<()> {
    let mut harness = Harness::new()?;
    complete_mainchain(&mut harness).await?;

    harness.sidechain.set_reference_height(SNAPSHOT_HEIGHT - 1);
    harness.sweep().await?;
    assert!(harness.ledger.is_complete(MAINCHAIN_SNAPSHOT_COMPLETE)?);
    assert!(!harness.ledger.is_complete(SIDECHAIN_SNAPSHOT_BLOCK_ID)?);

    harness.sidechain.set_reference_height(SNAPSHOT_HEIGHT);
    harness.sweep().await?;
    assert_eq!(
        harness.ledger.read_payload(SIDECHAIN_SNAPSHOT_BLOCK_ID)?,
        Some(FakeSidechain::block_id_for(SNAPSHOT_HEIGHT))
    );

    for reference in SNAPSHOT_HEIGHT + 1..REFERENCE_TARGET {
        harness.sidechain.set_reference_height(reference);
        let sweep = harness.sweep().await?;
        assert_eq!(sweep.distance, Some(REFERENCE_TARGET - reference));
        assert!(!harness.ledger.is_complete(SIDECHAIN_SNAPSHOT_TRIGGER)?);
        assert!(harness.sidechain.dumps().is_empty());
    }

    harness.sidechain.set_reference_height(REFERENCE_TARGET);
    harness.sweep().await?;

    let trigger: SidechainTrigger = serde_json::from_str(
        &harness
            .ledger
            .read_payload(SIDECHAIN_SNAPSHOT_TRIGGER)?
            .expect("trigger payload"),
    )?;
    let snapshot_height = SNAPSHOT_HEIGHT + SIDECHAIN_HEIGHT_OFFSET;
    assert_eq!(
        trigger,
        SidechainTrigger {
            block_id: FakeSidechain::block_id_for(SNAPSHOT_HEIGHT),
            height: snapshot_height,
        }
    );
    assert_eq!(
        harness.sidechain.dumps(),
        vec![(trigger.block_id.clone(), harness.layout.sidechain_snapshot())]
    );
    assert_eq!(
        harness.ledger.read_payload(SIDECHAIN_SNAPSHOT_COMPLETE)?,
        Some(snapshot_height.to_string())
    );
    Ok(())
}

#[tokio::test]
async fn sidechain_reference_to_another_fork_aborts() -> Result<()> {
    let mut harness = Harness::new()?;
    complete_mainchain(&mut harness).await?;

    harness.sidechain.set_mainchain_fork(7);
    harness.sidechain.set_reference_height(SNAPSHOT_HEIGHT);
    let err = harness.sweep().await.expect_err("foreign reference must abort");

    assert!(has_mismatch(&err), "{err:#}");
    assert!(!harness.ledger.is_complete(SIDECHAIN_SNAPSHOT_BLOCK_ID)?);
    Ok(())
}

#[tokio::test]
async fn sidechain_waits_for_rpc_readiness() -> Result<()> {
    let mut harness = Harness::new()?;
    complete_mainchain(&mut harness).await?;

    harness.sidechain.set_ready(false);
    harness.sidechain.set_reference_height(SNAPSHOT_HEIGHT);
    harness.sweep().await?;
    assert!(!harness.ledger.is_complete(SIDECHAIN_SNAPSHOT_BLOCK_ID)?);

    harness.sidechain.set_ready(true);
    harness.sweep().await?;
    assert!(harness.ledger.is_complete(SIDECHAIN_SNAPSHOT_BLOCK_ID)?);
    Ok(())
}

#[tokio::test]
async fn missing_sidechain_dump_is_requested_again() -> Result<()> {
    let mut harness = Harness::new()?;
    complete_mainchain(&mut harness).await?;
    harness.sidechain.set_reference_height(SNAPSHOT_HEIGHT);
    harness.sweep().await?;

    harness.sidechain.set_write_dumps(false);
    harness.sidechain.set_reference_height(REFERENCE_TARGET);
    let sweep = harness.sweep().await?;
    assert_eq!(sweep.distance, Some(0));
    assert!(harness.ledger.is_complete(SIDECHAIN_SNAPSHOT_TRIGGER)?);
    assert_eq!(harness.sidechain.dumps().len(), 1);

    // A restart resumes from the trigger marker and asks for the dump again.
    harness.restart()?;
    harness.sweep().await?;
    assert_eq!(harness.sidechain.dumps().len(), 2);
    assert!(!harness.ledger.is_complete(SIDECHAIN_SNAPSHOT_COMPLETE)?);

    harness.sidechain.set_write_dumps(true);
    harness.sweep().await?;
    assert_eq!(harness.sidechain.dumps().len(), 3);
    assert!(harness.ledger.is_complete(SIDECHAIN_SNAPSHOT_COMPLETE)?);
    Ok(())
}
