//! Subscription descriptors and the two listener keyspaces
//!
//! - subscription key: `sub:<context>:<component>:<referenceId>`
//! - reference key: `ref:<component>:<obfuscatedReference>`
use super::types::{RealTimeComponent, RealTimePayload};
use crate::errors::{RealtimeError, RealtimeResult};

pub const SUBSCRIPTION_PREFIX: &str = "sub";
pub const REFERENCE_PREFIX: &str = "ref";

/// Literal produced by clients that interpolated a missing value
const UNDEFINED: &str = "undefined";

/// Interest in the object stream of one reference within a context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    component: RealTimeComponent,
    context: String,
    reference_id: i64,
}

impl Subscription {
    pub fn new(
        component: RealTimeComponent,
        context: &str,
        reference_id: i64,
    ) -> RealtimeResult<Self> {
        if context.is_empty() {
            return Err(RealtimeError::InvalidSubscription(
                "context is required".to_string(),
            ));
        }
        if context.contains(':') {
            return Err(RealtimeError::InvalidSubscription(format!(
                "context '{}' must not contain ':'",
                context
            )));
        }
        if reference_id == 0 {
            return Err(RealtimeError::InvalidSubscription(
                "referenceId is required".to_string(),
            ));
        }

        Ok(Self {
            component,
            context: context.to_string(),
            reference_id,
        })
    }

    /// Comments posted on a reference
    pub fn comments(context: &str, reference_id: i64) -> RealtimeResult<Self> {
        Self::new(RealTimeComponent::Comment, context, reference_id)
    }

    /// Posts of a blog
    pub fn blog(context: &str, reference_id: i64) -> RealtimeResult<Self> {
        Self::new(RealTimeComponent::Blog, context, reference_id)
    }

    pub fn component(&self) -> RealTimeComponent {
        self.component
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn reference_id(&self) -> i64 {
        self.reference_id
    }

    pub fn key(&self) -> String {
        subscription_key(&self.context, self.component, self.reference_id)
    }
}

pub fn subscription_key(context: &str, component: RealTimeComponent, reference_id: i64) -> String {
    format!(
        "{}:{}:{}:{}",
        SUBSCRIPTION_PREFIX, context, component, reference_id
    )
}

pub fn reference_key(component: RealTimeComponent, obfuscated_reference: &str) -> String {
    format!("{}:{}:{}", REFERENCE_PREFIX, component, obfuscated_reference)
}

/// Split `"<communityName>:<context>"`. Both halves must be present and not `"undefined"`.
pub fn split_community_context(community_context: &str) -> RealtimeResult<(&str, &str)> {
    let invalid = || RealtimeError::InvalidCommunityContext(Some(community_context.to_string()));

    let (community, context) = community_context.split_once(':').ok_or_else(invalid)?;
    if community.is_empty() || context.is_empty() || community == UNDEFINED || context == UNDEFINED
    {
        return Err(invalid());
    }
    Ok((community, context))
}

/// Subscription key an inbound lifecycle payload is delivered to
pub fn payload_subscription_key(payload: &RealTimePayload) -> RealtimeResult<String> {
    let (_, context) = split_community_context(&payload.community_context)?;
    Ok(subscription_key(context, payload.component, payload.reference_id))
}

/// Reference key an inbound lifecycle payload is delivered to, if it names a reference
pub fn payload_reference_key(payload: &RealTimePayload) -> Option<String> {
    payload
        .obfuscated_reference
        .as_deref()
        .filter(|r| !r.is_empty())
        .map(|r| reference_key(payload.component, r))
}

/// Context segment of a key: the second segment of a subscription key,
/// the segment after the component of a reference key
pub(crate) fn key_context(key: &str) -> Option<&str> {
    let mut segments = key.split(':');
    match segments.next()? {
        SUBSCRIPTION_PREFIX => segments.next(),
        REFERENCE_PREFIX => segments.nth(1),
        _ => None,
    }
}
