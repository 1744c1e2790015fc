use kosbot_common::models::chat::ChatRoles;
use kosbot_common::models::command::PermissionTier;
use tracing::warn;

/// Whether a sender with `roles` may run a command requiring `tier`.
///
/// Higher roles include the lower ones: the broadcaster passes every tier,
/// moderators pass `subscribers`. Unknown tiers are allowed (fail-open).
pub fn allowed(tier: &PermissionTier, roles: &ChatRoles) -> bool {
    match tier {
        PermissionTier::Everyone => true,
        PermissionTier::Subscribers => roles.subscriber || roles.moderator || roles.broadcaster,
        PermissionTier::Moderators => roles.moderator || roles.broadcaster,
        PermissionTier::Broadcaster => roles.broadcaster,
        PermissionTier::Unrecognized(raw) => {
            warn!("Unrecognized permission tier '{}', allowing", raw);
            true
        }
    }
}
