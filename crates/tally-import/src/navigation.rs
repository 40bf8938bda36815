use tally_platform::BatchInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    First,
    Previous,
    Next,
    Last,
}

impl BatchAction {
    pub const ALL: [BatchAction; 4] = [
        BatchAction::First,
        BatchAction::Previous,
        BatchAction::Next,
        BatchAction::Last,
    ];
}

/// Maps navigation actions onto batch numbers. Holds no state of its own:
/// the requested batch is handed back to the wizard, which fetches it.
pub struct BatchNavigator;

impl BatchNavigator {
    /// Batch to request for `action`, or `None` when the action is disabled.
    pub fn target(info: &BatchInfo, action: BatchAction) -> Option<u32> {
        if info.total_batches == 0 {
            return None;
        }

        match action {
            BatchAction::First | BatchAction::Previous if info.is_first() => None,
            BatchAction::Next | BatchAction::Last if info.is_last() => None,
            BatchAction::First => Some(0),
            BatchAction::Previous => Some(info.current_batch - 1),
            BatchAction::Next => Some(info.current_batch + 1),
            BatchAction::Last => Some(info.total_batches - 1),
        }
    }

    pub fn is_enabled(info: &BatchInfo, action: BatchAction) -> bool {
        Self::target(info, action).is_some()
    }

    /// Human-readable position, e.g. `rows 101-200 of 250 (batch 2 of 3)`.
    pub fn describe(info: &BatchInfo) -> String {
        let batch = format!("batch {} of {}", info.current_batch + 1, info.total_batches);
        match info.row_range() {
            Some((start, end)) => format!("rows {start}-{end} of {} ({batch})", info.total_rows),
            None => format!("no rows ({batch})"),
        }
    }
}
