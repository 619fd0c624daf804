//! Discovery request priority classes.

/// A fixed-priority class of discovery request. Scheduling and rate-limit
/// cascading follow this order; it is never reordered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiscoveryMode {
    /// A lookup typed in directly by the user. Stateless: always consumes
    /// quota, never touches the persisted diff token, may run concurrently
    /// with anything.
    OneOffUserRequest,
    /// Backfilling service identifiers for known contacts.
    UuidBackfill,
    /// Resolving a recipient on the message-send path.
    OutgoingMessage,
    /// Resolving members during a group migration.
    GroupMigration,
    /// Full address-book intersection.
    ContactIntersection,
}

impl DiscoveryMode {
    /// All modes, highest priority first.
    pub fn in_priority_order() -> [DiscoveryMode; 5] {
        [
            DiscoveryMode::OneOffUserRequest,
            DiscoveryMode::UuidBackfill,
            DiscoveryMode::OutgoingMessage,
            DiscoveryMode::GroupMigration,
            DiscoveryMode::ContactIntersection,
        ]
    }

    /// Whether requests in this mode participate in the diff protocol and
    /// therefore must be serialized against other stateful requests.
    pub fn is_stateful(self) -> bool {
        !matches!(self, DiscoveryMode::OneOffUserRequest)
    }

    /// Whether the undiscoverable cache may elide a fetch for this mode.
    /// Latency-critical and full-scan modes always fetch.
    pub fn uses_undiscoverable_cache(self) -> bool {
        matches!(
            self,
            DiscoveryMode::OutgoingMessage | DiscoveryMode::GroupMigration
        )
    }
}
