// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Allowed scan status transitions. Every status or progress change on a
//! `Scan` goes through this module.

use chrono::Utc;

use crate::errors::{ScannerError, ScannerResult};
use crate::types::{Scan, ScanStatus};

/// Whether `from -> to` is an edge of the lifecycle graph
pub fn can_transition(from: ScanStatus, to: ScanStatus) -> bool {
    use ScanStatus::*;

    matches!(
        (from, to),
        (Pending, Queued)
            | (Queued, Running)
            | (Queued, Cancelled)
            | (Running, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
    )
}

fn check(scan: &Scan, to: ScanStatus) -> ScannerResult<()> {
    if scan.status.is_terminal() {
        return Err(ScannerError::AlreadyTerminal {
            scan_id: scan.id,
            status: scan.status,
        });
    }
    if !can_transition(scan.status, to) {
        return Err(ScannerError::InvalidTransition {
            scan_id: scan.id,
            from: scan.status,
            to,
        });
    }
    Ok(())
}

pub fn enqueue(scan: &mut Scan) -> ScannerResult<()> {
    check(scan, ScanStatus::Queued)?;
    scan.status = ScanStatus::Queued;
    Ok(())
}

pub fn start(scan: &mut Scan) -> ScannerResult<()> {
    check(scan, ScanStatus::Running)?;
    scan.status = ScanStatus::Running;
    scan.started_at = Some(Utc::now());
    scan.progress = 0;
    scan.current_stage = Some("starting".to_string());
    Ok(())
}

/// RUNNING -> RUNNING. Progress never moves backwards; a lower value only
/// updates the stage. Returns whether anything changed.
pub fn record_progress(scan: &mut Scan, progress: u8, stage: Option<&str>) -> ScannerResult<bool> {
    check(scan, ScanStatus::Running)?;

    let progress = progress.min(100);
    let mut changed = false;

    if progress > scan.progress {
        scan.progress = progress;
        changed = true;
    }
    if let Some(stage) = stage {
        if scan.current_stage.as_deref() != Some(stage) {
            scan.current_stage = Some(stage.to_string());
            changed = true;
        }
    }
    Ok(changed)
}

pub fn complete(scan: &mut Scan, hosts_found: u32, services_found: u32) -> ScannerResult<()> {
    check(scan, ScanStatus::Completed)?;
    scan.status = ScanStatus::Completed;
    scan.progress = 100;
    scan.current_stage = Some("completed".to_string());
    scan.completed_at = Some(Utc::now());
    scan.hosts_found = hosts_found;
    scan.services_found = services_found;
    scan.error = None;
    Ok(())
}

pub fn fail(scan: &mut Scan, error: impl Into<String>) -> ScannerResult<()> {
    check(scan, ScanStatus::Failed)?;
    scan.status = ScanStatus::Failed;
    scan.completed_at = Some(Utc::now());
    scan.error = Some(error.into());
    Ok(())
}

pub fn cancel(scan: &mut Scan) -> ScannerResult<()> {
    check(scan, ScanStatus::Cancelled)?;
    scan.status = ScanStatus::Cancelled;
    scan.completed_at = Some(Utc::now());
    scan.current_stage = Some("cancelled".to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ScanOptions, ScanType};
    use crate::validation::validate;
    use uuid::Uuid;

    const ALL: [ScanStatus; 6] = [
        ScanStatus::Pending,
        ScanStatus::Queued,
        ScanStatus::Running,
        ScanStatus::Completed,
        ScanStatus::Failed,
        ScanStatus::Cancelled,
    ];

    fn scan() -> Scan {
        Scan::new(
            Uuid::new_v4(),
            ScanType::Discovery,
            vec![validate("10.0.0.0/24").unwrap()],
            ScanOptions::default_for(ScanType::Discovery),
            false,
        )
    }

    fn running() -> Scan {
        let mut s = scan();
        enqueue(&mut s).unwrap();
        start(&mut s).unwrap();
        s
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!can_transition(*from, to), "{} -> {} must be rejected", from, to);
            }
        }
    }

    #[test]
    fn test_pending_cannot_skip_queue() {
        let mut s = scan();
        assert!(matches!(start(&mut s), Err(ScannerError::InvalidTransition { .. })));
        assert!(matches!(cancel(&mut s), Err(ScannerError::InvalidTransition { .. })));
        assert_eq!(s.status(), ScanStatus::Pending);
    }

    #[test]
    fn test_happy_path_sets_timestamps() {
        let mut s = running();
        assert!(s.started_at().is_some());

        complete(&mut s, 3, 7).unwrap();
        assert_eq!(s.status(), ScanStatus::Completed);
        assert_eq!(s.progress(), 100);
        assert_eq!(s.hosts_found(), 3);
        assert!(s.completed_at().is_some());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut s = running();
        assert!(record_progress(&mut s, 40, Some("Connect Scan")).unwrap());
        assert!(!record_progress(&mut s, 20, None).unwrap());
        assert_eq!(s.progress(), 40);
        assert!(record_progress(&mut s, 20, Some("Service scan")).unwrap());
        assert_eq!(s.progress(), 40);
        assert_eq!(s.current_stage(), Some("Service scan"));
        record_progress(&mut s, 250, None).unwrap();
        assert_eq!(s.progress(), 100);
    }

    #[test]
    fn test_no_change_after_cancel() {
        let mut s = running();
        cancel(&mut s).unwrap();

        assert!(matches!(
            complete(&mut s, 1, 1),
            Err(ScannerError::AlreadyTerminal { status: ScanStatus::Cancelled, .. })
        ));
        assert!(record_progress(&mut s, 90, None).is_err());
        assert!(fail(&mut s, "late").is_err());
        assert_eq!(s.status(), ScanStatus::Cancelled);
    }

    #[test]
    fn test_queued_scan_can_be_cancelled() {
        let mut s = scan();
        enqueue(&mut s).unwrap();
        cancel(&mut s).unwrap();
        assert_eq!(s.status(), ScanStatus::Cancelled);
    }
}
