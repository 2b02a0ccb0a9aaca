//! Versioned message-type registry
//!
//! Each protocol version owns a table from wire type to handler. Lookups start
//! at the requested version and fall back through older versions, so a later
//! version only needs to register what it adds or overrides.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use wearlink_core::{message_types, RtmMessage, RtmProtocolVersion, WearlinkResult};

use super::context::HandlerContext;
use super::handlers;

// ----------------------------------------------------------------------------
// Handler Trait
// ----------------------------------------------------------------------------

/// Dispatch target for one inbound message type
#[async_trait]
pub trait RtmMessageHandler: Send + Sync {
    async fn handle(&self, message: &RtmMessage, context: &HandlerContext) -> WearlinkResult<()>;
}

// ----------------------------------------------------------------------------
// Message Type Registry
// ----------------------------------------------------------------------------

/// A handler together with the version table it was found in
#[derive(Clone)]
pub struct ResolvedHandler {
    pub version: RtmProtocolVersion,
    pub handler: Arc<dyn RtmMessageHandler>,
}

#[derive(Default, Clone)]
pub struct MessageTypeRegistry {
    versions: BTreeMap<RtmProtocolVersion, HashMap<String, Arc<dyn RtmMessageHandler>>>,
}

impl MessageTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers for every supported version
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        handlers::register_defaults(&mut registry);
        registry
    }

    /// Register `handler` for `message_type` at `version`, replacing any
    /// earlier registration at that same version
    pub fn register<H>(&mut self, version: RtmProtocolVersion, message_type: &str, handler: H)
    where
        H: RtmMessageHandler + 'static,
    {
        self.register_shared(version, message_type, Arc::new(handler));
    }

    pub fn register_shared(
        &mut self,
        version: RtmProtocolVersion,
        message_type: &str,
        handler: Arc<dyn RtmMessageHandler>,
    ) {
        self.versions
            .entry(version)
            .or_default()
            .insert(message_type.to_string(), handler);
    }

    /// Find the handler for `message_type`, walking down from `version`
    pub fn resolve(
        &self,
        version: RtmProtocolVersion,
        message_type: &str,
    ) -> Option<ResolvedHandler> {
        let mut current = Some(version);
        while let Some(candidate) = current {
            if let Some(handler) = self
                .versions
                .get(&candidate)
                .and_then(|table| table.get(message_type))
            {
                return Some(ResolvedHandler {
                    version: candidate,
                    handler: Arc::clone(handler),
                });
            }
            current = candidate.previous();
        }
        None
    }

    /// Every type resolvable at `version`, sorted
    pub fn handled_types(&self, version: RtmProtocolVersion) -> Vec<String> {
        let mut types: Vec<String> = self
            .versions
            .range(..=version)
            .flat_map(|(_, table)| table.keys().cloned())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// Types the protocol defines but that have no inbound handler
    pub fn is_known_without_handler(message_type: &str) -> bool {
        matches!(
            message_type,
            message_types::RESOLVE
                | message_types::DEVICE_STATUS
                | message_types::CARD_SCANNED
                | message_types::SDK_VERSION
                | message_types::APDU_PACKAGE_RESULT
        )
    }
}

impl std::fmt::Debug for MessageTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (version, table) in &self.versions {
            let mut types: Vec<&String> = table.keys().collect();
            types.sort();
            map.entry(version, &types);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl RtmMessageHandler for Noop {
        async fn handle(&self, _message: &RtmMessage, _context: &HandlerContext) -> WearlinkResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_resolution_falls_back_to_older_versions() {
        let mut registry = MessageTypeRegistry::new();
        registry.register(RtmProtocolVersion::V2, "sync", Noop);
        registry.register(RtmProtocolVersion::V3, "apduPackage", Noop);

        let resolved = registry.resolve(RtmProtocolVersion::V3, "sync").unwrap();
        assert_eq!(resolved.version, RtmProtocolVersion::V2);

        let resolved = registry.resolve(RtmProtocolVersion::V4, "apduPackage").unwrap();
        assert_eq!(resolved.version, RtmProtocolVersion::V3);

        assert!(registry.resolve(RtmProtocolVersion::V2, "apduPackage").is_none());
        assert!(registry.resolve(RtmProtocolVersion::V4, "teleport").is_none());
    }

    #[test]
    fn test_later_version_overrides() {
        let mut registry = MessageTypeRegistry::new();
        registry.register(RtmProtocolVersion::V2, "userData", Noop);
        registry.register(RtmProtocolVersion::V4, "userData", Noop);

        assert_eq!(
            registry.resolve(RtmProtocolVersion::V4, "userData").unwrap().version,
            RtmProtocolVersion::V4
        );
        assert_eq!(
            registry.resolve(RtmProtocolVersion::V3, "userData").unwrap().version,
            RtmProtocolVersion::V2
        );
    }

    #[test]
    fn test_default_handler_tables() {
        let registry = MessageTypeRegistry::with_default_handlers();
        let v2 = registry.handled_types(RtmProtocolVersion::V2);
        assert_eq!(v2, vec!["logout", "sync", "userData", "version"]);

        let v4 = registry.handled_types(RtmProtocolVersion::V4);
        for expected in ["apduPackage", "securityState", "scanRequest", "sdkVersionRequest", "sync"] {
            assert!(v4.iter().any(|t| t == expected), "missing {}", expected);
        }
        assert!(registry.resolve(RtmProtocolVersion::V4, "resolve").is_none());
        assert!(MessageTypeRegistry::is_known_without_handler("resolve"));
    }
}
