// Account identities and the per-owner player address.
pub use solana_sdk::{
    pubkey::Pubkey,
    signature::Signature,
};

pub const PLAYER_SEED: &[u8] = b"player";

/// Address of the player account owned by `owner`.
pub fn player_address(owner: &Pubkey, program_id: &Pubkey) -> Pubkey {
    let (address, _bump) =
        Pubkey::find_program_address(&[PLAYER_SEED, owner.as_ref()], program_id);
    address
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    const PROGRAM_ID: &str = "hirTPHnA6on8w2ATUku2bKJST2wqhdY5CdWt8SS7d93";

    #[test]
    fn player_address__known_owner__uses_highest_off_curve_bump() {
        // given
        let program: Pubkey = PROGRAM_ID.parse().unwrap();
        let owner = Pubkey::new_from_array([17; 32]);

        // when
        let (address, bump) =
            Pubkey::find_program_address(&[PLAYER_SEED, owner.as_ref()], &program);

        // then
        assert_eq!(bump, 252);
        assert_eq!(player_address(&owner, &program), address);
        assert_eq!(
            address.to_string(),
            "8pR7eCUsrq8u1wozEMefgXTFc7DD8ZjdHS9aa3vcLX1t"
        );
        assert!(!address.is_on_curve());
    }

    #[test]
    fn player_address__first_bump_off_curve__is_stable() {
        let program: Pubkey = PROGRAM_ID.parse().unwrap();
        let owner = Pubkey::new_from_array([7; 32]);

        let address = player_address(&owner, &program);

        assert_eq!(
            address.to_string(),
            "ydACrqUUxNowiabAkmrF12jN1yRnBhTQybaNs1KJwaB"
        );
    }

    #[test]
    fn player_address__different_owners__never_collide() {
        let program: Pubkey = PROGRAM_ID.parse().unwrap();

        let alice = player_address(&Pubkey::new_from_array([17; 32]), &program);
        let bob = player_address(&Pubkey::new_from_array([18; 32]), &program);

        assert_ne!(alice, bob);
    }
}
