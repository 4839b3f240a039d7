//! Per-device topic layout.
//!
//! Everything lives under `{prefix}/{device_id}`:
//!
//! | Topic               | Direction | Retained | Payload            |
//! |---------------------|-----------|----------|--------------------|
//! | `availability`      | out (LWT) | yes      | `online`/`offline` |
//! | `stat/relay`        | out       | yes      | `ON`/`OFF`         |
//! | `stat/fault`        | out       | yes      | JSON               |
//! | `tele/power`        | out       | no       | JSON report        |
//! | `tele/info`         | out       | yes      | JSON device info   |
//! | `cmnd/<name>`       | in        |          | see `commands`     |

use core::fmt::Write;

use crate::identity::DeviceId;

pub const TOPIC_LEN: usize = 96;

pub type Topic = heapless::String<TOPIC_LEN>;

pub const AVAILABILITY_ONLINE: &str = "online";
pub const AVAILABILITY_OFFLINE: &str = "offline";

/// Which outbound topic a message goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Availability,
    Relay,
    Fault,
    Power,
    Info,
}

#[derive(Debug, Clone)]
pub struct Topics {
    base: Topic,
}

impl Topics {
    /// `None` if prefix and id do not fit a topic buffer with room for suffixes
    pub fn new(prefix: &str, device_id: &DeviceId) -> Option<Self> {
        let mut base = Topic::new();
        write!(base, "{}/{}", prefix.trim_end_matches('/'), device_id).ok()?;
        // Longest suffix is "/availability"
        if base.len() + 13 > TOPIC_LEN {
            return None;
        }
        Some(Self { base })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn with_suffix(&self, suffix: &str) -> Topic {
        let mut topic = self.base.clone();
        // Length checked in `new`
        let _ = topic.push_str(suffix);
        topic
    }

    pub fn topic(&self, kind: TopicKind) -> Topic {
        self.with_suffix(match kind {
            TopicKind::Availability => "/availability",
            TopicKind::Relay => "/stat/relay",
            TopicKind::Fault => "/stat/fault",
            TopicKind::Power => "/tele/power",
            TopicKind::Info => "/tele/info",
        })
    }

    /// Subscription filter for all commands
    pub fn command_filter(&self) -> Topic {
        self.with_suffix("/cmnd/+")
    }

    /// Command name if `topic` is one of this device's command topics
    pub fn command_name<'t>(&self, topic: &'t str) -> Option<&'t str> {
        let rest = topic.strip_prefix(self.base.as_str())?;
        let name = rest.strip_prefix("/cmnd/")?;
        (!name.is_empty() && !name.contains('/')).then_some(name)
    }
}
