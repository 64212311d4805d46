//! Standard subject and stream names.

use crate::traits::Topic;

/// Names shared by every agent of a fleet.
pub struct SubjectPatterns;

impl SubjectPatterns {
    /// Subject carrying serialized activity nodes.
    #[must_use]
    pub fn activities() -> &'static str {
        "convoy.activities"
    }

    /// Subject carrying control/status messages.
    #[must_use]
    pub fn control() -> &'static str {
        "convoy.control"
    }

    /// JetStream work-queue stream backing [`SubjectPatterns::activities`].
    #[must_use]
    pub fn activities_stream() -> &'static str {
        "CONVOY_ACTIVITIES"
    }

    /// Durable consumer shared by all agents, so each node reaches one agent.
    #[must_use]
    pub fn activities_consumer() -> &'static str {
        "convoy-agents"
    }

    /// Subject for a topic.
    #[must_use]
    pub fn subject(topic: Topic) -> &'static str {
        match topic {
            Topic::Activities => Self::activities(),
            Topic::Control => Self::control(),
        }
    }
}
