//! Change detection between consecutive snapshots.
//!
//! [`diff_snapshots`] turns two decoded frames into the transitions an
//! operator cares about. Master-level events come first (alarm, trouble,
//! silence, drill), followed by slave events in ascending address order.
//! The function is pure; persisting the result is up to an event sink.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::{MasterStatus, SlaveState, SlaveStatus, Snapshot, MAX_SLAVE_ADDRESS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    AlarmRaised,
    AlarmCleared,
    TroubleRaised,
    TroubleCleared,
    ModeToggled,
    SlaveOnline,
    SlaveOffline,
    SlaveStatusChanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::AlarmRaised => "ALARM_RAISED",
            ChangeKind::AlarmCleared => "ALARM_CLEARED",
            ChangeKind::TroubleRaised => "TROUBLE_RAISED",
            ChangeKind::TroubleCleared => "TROUBLE_CLEARED",
            ChangeKind::ModeToggled => "MODE_TOGGLED",
            ChangeKind::SlaveOnline => "SLAVE_ONLINE",
            ChangeKind::SlaveOffline => "SLAVE_OFFLINE",
            ChangeKind::SlaveStatusChanged => "SLAVE_STATUS_CHANGED",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Coarse grouping used by the event log and its viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogCategory {
    Normal,
    Alarm,
    Trouble,
    Command,
}

impl LogCategory {
    pub const ALL: [LogCategory; 4] = [
        LogCategory::Normal,
        LogCategory::Alarm,
        LogCategory::Trouble,
        LogCategory::Command,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Normal => "NORMAL",
            LogCategory::Alarm => "ALARM",
            LogCategory::Trouble => "TROUBLE",
            LogCategory::Command => "COMMAND",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        LogCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One semantic transition between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_address: Option<u8>,
    pub detail: String,
    /// New state of the subject slave, for slave-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SlaveState>,
}

impl ChangeEvent {
    fn master(kind: ChangeKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            subject_address: None,
            detail: detail.into(),
            state: None,
        }
    }

    fn slave(kind: ChangeKind, slave: &SlaveStatus, detail: String) -> Self {
        Self {
            kind,
            subject_address: Some(slave.address),
            detail,
            state: Some(slave.status),
        }
    }

    pub fn category(&self) -> LogCategory {
        match self.kind {
            ChangeKind::AlarmRaised => LogCategory::Alarm,
            ChangeKind::TroubleRaised | ChangeKind::SlaveOffline => LogCategory::Trouble,
            ChangeKind::AlarmCleared | ChangeKind::TroubleCleared | ChangeKind::SlaveOnline => {
                LogCategory::Normal
            }
            ChangeKind::ModeToggled => LogCategory::Command,
            ChangeKind::SlaveStatusChanged => match self.state {
                Some(SlaveState::Alarm) => LogCategory::Alarm,
                Some(SlaveState::Trouble) | Some(SlaveState::Offline) => LogCategory::Trouble,
                Some(SlaveState::Normal) | None => LogCategory::Normal,
            },
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.detail)
    }
}

/// Compare two consecutive snapshots.
///
/// An unknown previous master reads as all-inactive, so an alarm already
/// present in the first frame is reported. An unknown current master reports
/// nothing. A slave missing from `previous` counts as never observed.
pub fn diff_snapshots(previous: &Snapshot, current: &Snapshot) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    if let Some(curr) = &current.master {
        let prev = previous.master.unwrap_or_default();
        diff_master(&prev, curr, current, &mut events);
    }

    for address in 1..=MAX_SLAVE_ADDRESS {
        let Some(curr) = current.slaves.get(&address) else {
            continue;
        };
        match previous.slaves.get(&address) {
            None if curr.online => events.push(ChangeEvent::slave(
                ChangeKind::SlaveOnline,
                curr,
                format!("Slave {} came online", address),
            )),
            None => {}
            Some(prev) if prev.online && !curr.online => events.push(ChangeEvent::slave(
                ChangeKind::SlaveOffline,
                curr,
                format!("Slave {} went offline", address),
            )),
            Some(prev) if prev.status != curr.status => events.push(ChangeEvent::slave(
                ChangeKind::SlaveStatusChanged,
                curr,
                status_detail(curr),
            )),
            Some(_) => {}
        }
    }

    events
}

fn diff_master(
    prev: &MasterStatus,
    curr: &MasterStatus,
    current: &Snapshot,
    events: &mut Vec<ChangeEvent>,
) {
    if prev.alarm_active != curr.alarm_active {
        if curr.alarm_active {
            let count = current.slaves_in(SlaveState::Alarm).count();
            events.push(ChangeEvent::master(
                ChangeKind::AlarmRaised,
                format!("Fire alarm activated ({} slave(s) in alarm)", count),
            ));
        } else {
            events.push(ChangeEvent::master(ChangeKind::AlarmCleared, "All alarms cleared"));
        }
    }

    if prev.trouble_active != curr.trouble_active {
        if curr.trouble_active {
            let count = current.slaves_in(SlaveState::Trouble).count();
            events.push(ChangeEvent::master(
                ChangeKind::TroubleRaised,
                format!("System trouble detected ({} slave(s) in trouble)", count),
            ));
        } else {
            events.push(ChangeEvent::master(
                ChangeKind::TroubleCleared,
                "All troubles cleared",
            ));
        }
    }

    if prev.silenced != curr.silenced {
        let word = if curr.silenced { "silenced" } else { "unsilenced" };
        events.push(ChangeEvent::master(
            ChangeKind::ModeToggled,
            format!("System {}", word),
        ));
    }

    if prev.supervisory != curr.supervisory {
        let word = if curr.supervisory {
            "activated"
        } else {
            "deactivated"
        };
        events.push(ChangeEvent::master(
            ChangeKind::ModeToggled,
            format!("Drill mode {}", word),
        ));
    }
}

fn status_detail(slave: &SlaveStatus) -> String {
    let address = slave.address;
    match slave.status {
        SlaveState::Alarm if slave.alarm_zones.is_empty() => {
            format!("Fire alarm in slave {}", address)
        }
        SlaveState::Alarm => format!(
            "Fire alarm in slave {}. Zones: {}",
            address, slave.alarm_zones
        ),
        SlaveState::Trouble if slave.trouble_zones.is_empty() => {
            format!("Trouble in slave {}", address)
        }
        SlaveState::Trouble => format!(
            "Trouble in slave {}. Zones: {}",
            address, slave.trouble_zones
        ),
        SlaveState::Normal => format!("Slave {} returned to normal", address),
        SlaveState::Offline => format!("Slave {} is offline", address),
    }
}
