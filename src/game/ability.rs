//! Ability Engine
//!
//! Cooldown-gated abilities. Each ability has its own cooldown measured from
//! its own last activation; abilities never block each other.

use serde::{Deserialize, Serialize};

use crate::core::vec2::Vec2;
use crate::game::state::{Ability, Player};

/// Ability tuning. Durations are milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbilityConfig {
    /// Dash cooldown
    pub dash_cooldown_ms: i64,
    /// Dash impulse added to velocity (units per second)
    pub dash_impulse: f64,
    /// Teleport cooldown
    pub teleport_cooldown_ms: i64,
    /// Teleport distance when no target is given
    pub teleport_distance: f64,
    /// Shield cooldown
    pub shield_cooldown_ms: i64,
    /// How long a shield lasts
    pub shield_duration_ms: i64,
}

impl Default for AbilityConfig {
    fn default() -> Self {
        Self {
            dash_cooldown_ms: 3000,
            dash_impulse: 600.0,
            teleport_cooldown_ms: 5000,
            teleport_distance: 200.0,
            shield_cooldown_ms: 8000,
            shield_duration_ms: 1500,
        }
    }
}

impl AbilityConfig {
    /// Cooldown for an ability.
    pub fn cooldown_ms(&self, ability: Ability) -> i64 {
        match ability {
            Ability::Dash => self.dash_cooldown_ms,
            Ability::Teleport => self.teleport_cooldown_ms,
            Ability::Shield => self.shield_cooldown_ms,
        }
    }
}

/// Why an activation was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Cooldown has not elapsed since the last activation.
    OnCooldown {
        /// Time left until the ability is ready.
        remaining_ms: i64,
    },
}

/// Result of an activation attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    /// Effect applied and cooldown restarted.
    Activated(Ability),
    /// Nothing changed.
    Rejected(Rejection),
}

impl Activation {
    /// Check if the ability fired.
    pub fn is_activated(&self) -> bool {
        matches!(self, Activation::Activated(_))
    }
}

/// Try to activate `ability` for `player` at `now_ms`.
///
/// Rejected iff a previous activation exists and
/// `now_ms - last < cooldown`. Re-activation exactly at `last + cooldown`
/// is accepted.
pub fn activate(
    player: &mut Player,
    ability: Ability,
    target: Option<Vec2>,
    now_ms: i64,
    config: &AbilityConfig,
) -> Activation {
    let cooldown = config.cooldown_ms(ability);
    if let Some(&last) = player.last_ability_ts.get(&ability) {
        let elapsed = now_ms.saturating_sub(last);
        if elapsed < cooldown {
            return Activation::Rejected(Rejection::OnCooldown {
                remaining_ms: cooldown.saturating_sub(elapsed),
            });
        }
    }

    player.last_ability_ts.insert(ability, now_ms);
    apply_ability(player, ability, target, now_ms, config);
    Activation::Activated(ability)
}

/// Apply an ability's effect without any cooldown check.
pub fn apply_ability(
    player: &mut Player,
    ability: Ability,
    target: Option<Vec2>,
    now_ms: i64,
    config: &AbilityConfig,
) {
    match ability {
        Ability::Dash => {
            // Additive: stacks with current motion
            let impulse = player.facing_dir().scale(config.dash_impulse);
            player.velocity = player.velocity.add(impulse);
        }
        Ability::Teleport => {
            // Not clamped here; the next integration step clamps
            player.position = match target {
                Some(target) => target,
                None => player
                    .position
                    .add(player.facing_dir().scale(config.teleport_distance)),
            };
        }
        Ability::Shield => {
            player.shield_until = Some(now_ms.saturating_add(config.shield_duration_ms));
        }
    }
}
