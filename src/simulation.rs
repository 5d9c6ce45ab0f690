//! Local mirror of the game program's rules, used once the program is unreachable.
//!
//! The transition functions are pure: the same prior state and entropy always give the same
//! result. [`Simulator`] owns the randomness and the reward configuration.
use crate::{
    address::Pubkey,
    codec::PlayerState,
    error::PreconditionViolation,
};
use rand::{
    Rng,
    SeedableRng,
    rngs::StdRng,
};
use serde::{
    Deserialize,
    Serialize,
};

pub const MAX_HP: u8 = 100;

/// 32 bytes of encounter entropy. Never all zero, since an all-zero event means
/// "no encounter pending".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entropy([u8; 32]);

impl Entropy {
    pub fn new(bytes: [u8; 32]) -> Option<Self> {
        (bytes != [0; 32]).then_some(Self(bytes))
    }

    pub fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitParams {
    pub hp: u8,
    pub atk: u8,
    pub def: u8,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            hp: 100,
            atk: 10,
            def: 5,
        }
    }
}

impl InitParams {
    pub fn validate(&self) -> Result<(), PreconditionViolation> {
        let valid = (1..=100).contains(&self.hp)
            && (1..=50).contains(&self.atk)
            && self.def <= 20;
        if valid {
            Ok(())
        } else {
            Err(PreconditionViolation::InvalidStats {
                hp: self.hp,
                atk: self.atk,
                def: self.def,
            })
        }
    }
}

/// What a successful claim grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardEffect {
    pub heal: u8,
    pub hp_cap: u8,
}

impl Default for RewardEffect {
    fn default() -> Self {
        Self {
            heal: 20,
            hp_cap: MAX_HP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Monster {
    pub hp: u32,
    pub atk: u32,
    pub def: u32,
}

impl Monster {
    pub fn from_event(event: &[u8; 32], level: u8) -> Self {
        let level = u32::from(level);
        Self {
            hp: u32::from(event[0]) % 30 + 20 + 5 * level,
            atk: u32::from(event[1]) % 10 + 5 + 2 * level,
            def: u32::from(event[2]) % 5 + level / 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatOutcome {
    Victory,
    Defeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatReport {
    pub monster: Monster,
    pub player_damage: u32,
    pub monster_damage: u32,
    pub rounds_to_kill: u32,
    pub rounds_to_die: u32,
    pub hp_lost: u8,
    pub outcome: CombatOutcome,
}

pub fn init(owner: Pubkey, params: InitParams) -> Result<PlayerState, PreconditionViolation> {
    params.validate()?;
    Ok(PlayerState {
        owner,
        hp: params.hp,
        atk: params.atk,
        def: params.def,
        level: 1,
        last_event: [0; 32],
        reward_available: false,
    })
}

pub fn explore(state: &PlayerState, entropy: Entropy) -> Result<PlayerState, PreconditionViolation> {
    if !state.is_alive() {
        return Err(PreconditionViolation::PlayerDead);
    }
    Ok(PlayerState {
        last_event: entropy.bytes(),
        ..*state
    })
}

pub fn fight(state: &PlayerState) -> Result<(PlayerState, CombatReport), PreconditionViolation> {
    if !state.has_pending_encounter() {
        return Err(PreconditionViolation::NoPendingEncounter);
    }
    if !state.is_alive() {
        return Err(PreconditionViolation::PlayerDead);
    }

    let monster = Monster::from_event(&state.last_event, state.level);
    let player_damage = u32::from(state.atk).saturating_sub(monster.def).max(1);
    let monster_damage = monster.atk.saturating_sub(u32::from(state.def)).max(1);
    let rounds_to_kill = monster.hp.div_ceil(player_damage);
    let rounds_to_die = u32::from(state.hp).div_ceil(monster_damage);

    let mut next = PlayerState {
        last_event: [0; 32],
        ..*state
    };
    let outcome = if rounds_to_kill <= rounds_to_die {
        let taken = (rounds_to_kill - 1).saturating_mul(monster_damage);
        next.hp = u32::from(state.hp).saturating_sub(taken) as u8;
        next.level = state.level.saturating_add(1);
        next.reward_available = true;
        CombatOutcome::Victory
    } else {
        next.hp = 0;
        next.reward_available = false;
        CombatOutcome::Defeat
    };

    let report = CombatReport {
        monster,
        player_damage,
        monster_damage,
        rounds_to_kill,
        rounds_to_die,
        hp_lost: state.hp - next.hp,
        outcome,
    };
    Ok((next, report))
}

pub fn claim(state: &PlayerState, reward: RewardEffect) -> Result<PlayerState, PreconditionViolation> {
    if !state.reward_available {
        return Err(PreconditionViolation::NothingToClaim);
    }
    Ok(PlayerState {
        reward_available: false,
        hp: state.hp.saturating_add(reward.heal).min(reward.hp_cap),
        ..*state
    })
}

pub fn equip(state: &PlayerState, atk_bonus: u8, def_bonus: u8) -> PlayerState {
    PlayerState {
        atk: state.atk.saturating_add(atk_bonus),
        def: state.def.saturating_add(def_bonus),
        ..*state
    }
}

/// Entropy source plus reward configuration for simulated sessions.
pub struct Simulator {
    rng: StdRng,
    reward: RewardEffect,
}

impl Simulator {
    pub fn new(reward: RewardEffect) -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            reward,
        }
    }

    pub fn seeded(seed: u64, reward: RewardEffect) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            reward,
        }
    }

    pub fn reward(&self) -> RewardEffect {
        self.reward
    }

    pub fn entropy(&mut self) -> Entropy {
        loop {
            if let Some(entropy) = Entropy::new(self.rng.random()) {
                return entropy;
            }
        }
    }

    pub fn explore(&mut self, state: &PlayerState) -> Result<PlayerState, PreconditionViolation> {
        let entropy = self.entropy();
        explore(state, entropy)
    }

    pub fn claim(&self, state: &PlayerState) -> Result<PlayerState, PreconditionViolation> {
        claim(state, self.reward)
    }

    /// Identifier for a simulated action, shaped so it can never parse as a signature.
    pub fn receipt(&mut self) -> String {
        format!("sim-{}", hex::encode(self.rng.random::<[u8; 8]>()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use proptest::prelude::*;

    fn player(hp: u8, atk: u8, def: u8) -> PlayerState {
        PlayerState {
            owner: Pubkey::new_from_array([1; 32]),
            hp,
            atk,
            def,
            level: 1,
            last_event: [0; 32],
            reward_available: false,
        }
    }

    fn with_event(mut state: PlayerState, event: [u8; 32]) -> PlayerState {
        state.last_event = event;
        state
    }

    #[test]
    fn monster__from_event__scales_with_level() {
        let mut event = [0u8; 32];
        event[0] = 35;
        event[1] = 13;
        event[2] = 9;

        let monster = Monster::from_event(&event, 4);

        assert_eq!(
            monster,
            Monster {
                hp: 5 + 20 + 20,
                atk: 3 + 5 + 8,
                def: 4 + 2,
            }
        );
    }

    #[test]
    fn fight__strong_player__wins_and_levels_up() {
        // given
        let mut event = [0u8; 32];
        event[0] = 29;
        event[1] = 9;
        event[2] = 4;
        let state = with_event(player(100, 50, 20), event);

        // when
        let (next, report) = fight(&state).unwrap();

        // then
        assert_eq!(report.outcome, CombatOutcome::Victory);
        assert_eq!(report.monster, Monster { hp: 54, atk: 16, def: 4 });
        assert_eq!(report.player_damage, 46);
        assert_eq!(report.monster_damage, 1);
        assert_eq!(report.rounds_to_kill, 2);
        assert_eq!(next.hp, 99);
        assert_eq!(next.level, 2);
        assert!(next.reward_available);
        assert!(!next.has_pending_encounter());
    }

    #[test]
    fn fight__weak_player__dies_without_reward() {
        // given
        let mut event = [0u8; 32];
        event[0] = 29;
        event[1] = 9;
        let state = with_event(player(5, 1, 0), event);

        // when
        let (next, report) = fight(&state).unwrap();

        // then
        assert_eq!(report.outcome, CombatOutcome::Defeat);
        assert_eq!(next.hp, 0);
        assert!(!next.reward_available);
        assert_eq!(next.level, 1);
        assert_eq!(next.last_event, [0; 32]);
    }

    #[test]
    fn fight__without_encounter__is_rejected() {
        let err = fight(&player(100, 10, 5)).unwrap_err();

        assert_eq!(err, PreconditionViolation::NoPendingEncounter);
    }

    #[test]
    fn fight__dead_player__is_rejected() {
        let state = with_event(player(0, 10, 5), [1; 32]);

        assert_eq!(fight(&state).unwrap_err(), PreconditionViolation::PlayerDead);
    }

    #[test]
    fn explore__dead_player__is_rejected() {
        let entropy = Entropy::new([4; 32]).unwrap();

        let err = explore(&player(0, 10, 5), entropy).unwrap_err();

        assert_eq!(err, PreconditionViolation::PlayerDead);
    }

    #[test]
    fn entropy__all_zero__is_not_constructible() {
        assert!(Entropy::new([0; 32]).is_none());
    }

    #[test]
    fn claim__with_reward__heals_capped_at_max() {
        // given
        let mut state = player(95, 10, 5);
        state.reward_available = true;

        // when
        let next = claim(&state, RewardEffect::default()).unwrap();

        // then
        assert_eq!(next.hp, 100);
        assert!(!next.reward_available);
    }

    #[test]
    fn claim__without_reward__is_rejected() {
        let err = claim(&player(50, 10, 5), RewardEffect::default()).unwrap_err();

        assert_eq!(err, PreconditionViolation::NothingToClaim);
    }

    #[test]
    fn init__out_of_range_stats__is_rejected() {
        let owner = Pubkey::new_from_array([2; 32]);

        for params in [
            InitParams { hp: 0, atk: 10, def: 5 },
            InitParams { hp: 101, atk: 10, def: 5 },
            InitParams { hp: 50, atk: 51, def: 5 },
            InitParams { hp: 50, atk: 0, def: 5 },
            InitParams { hp: 50, atk: 10, def: 21 },
        ] {
            assert!(matches!(
                init(owner, params),
                Err(PreconditionViolation::InvalidStats { .. })
            ));
        }
    }

    #[test]
    fn init__default_params__creates_level_one_player() {
        let state = init(Pubkey::new_from_array([2; 32]), InitParams::default()).unwrap();

        assert_eq!((state.hp, state.atk, state.def, state.level), (100, 10, 5, 1));
        assert!(!state.has_pending_encounter());
        assert!(!state.reward_available);
    }

    #[test]
    fn equip__bonus__saturates() {
        let next = equip(&player(100, 250, 5), 10, 3);

        assert_eq!((next.atk, next.def), (255, 8));
    }

    #[test]
    fn receipt__any_simulator__is_prefixed() {
        let mut simulator = Simulator::seeded(1, RewardEffect::default());

        let receipt = simulator.receipt();

        assert!(receipt.starts_with("sim-"));
        assert_eq!(receipt.len(), 4 + 16);
    }

    #[test]
    fn simulator__seeded__is_reproducible() {
        let state = player(100, 10, 5);
        let mut a = Simulator::seeded(7, RewardEffect::default());
        let mut b = Simulator::seeded(7, RewardEffect::default());

        assert_eq!(a.explore(&state).unwrap(), b.explore(&state).unwrap());
    }

    fn any_player() -> impl Strategy<Value = PlayerState> {
        (1u8..=100, 1u8..=50, 0u8..=20, 1u8..=20, any::<[u8; 32]>()).prop_map(
            |(hp, atk, def, level, event)| PlayerState {
                owner: Pubkey::new_from_array([3; 32]),
                hp,
                atk,
                def,
                level,
                last_event: event,
                reward_available: false,
            },
        )
    }

    proptest! {
        #[test]
        fn fight__any_encounter__clears_event_and_keeps_reward_invariant(state in any_player()) {
            prop_assume!(state.has_pending_encounter());

            let (next, report) = fight(&state).unwrap();

            prop_assert!(!next.has_pending_encounter());
            prop_assert!(!next.reward_available || next.hp > 0);
            prop_assert_eq!(next.hp == 0, report.outcome == CombatOutcome::Defeat);
            prop_assert!(next.hp <= state.hp);
            prop_assert_eq!(state.hp - next.hp, report.hp_lost);
        }

        #[test]
        fn fight__same_input__same_result(state in any_player()) {
            prop_assume!(state.has_pending_encounter());

            prop_assert_eq!(fight(&state).unwrap(), fight(&state).unwrap());
        }

        #[test]
        fn simulator_entropy__any_seed__is_never_zero(seed in any::<u64>()) {
            let mut simulator = Simulator::seeded(seed, RewardEffect::default());

            prop_assert!(simulator.entropy().bytes() != [0; 32]);
        }
    }
}
