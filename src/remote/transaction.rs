//! Instruction encoding and transaction assembly for the game program.
use crate::{
    address::Pubkey,
    codec::discriminator,
    error::ClientError,
    simulation::InitParams,
};
use solana_sdk::{
    hash::Hash,
    instruction::{
        AccountMeta,
        Instruction,
    },
    message::Message,
    signer::Signer,
    system_program,
    transaction::Transaction,
};
use tx_history::TxAction;

/// The five operations the game program exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramInstruction {
    InitPlayer(InitParams),
    Explore,
    Fight,
    Claim,
    Equip { atk_bonus: u8, def_bonus: u8 },
}

impl ProgramInstruction {
    pub fn action(&self) -> TxAction {
        match self {
            ProgramInstruction::InitPlayer(_) => TxAction::Init,
            ProgramInstruction::Explore => TxAction::Explore,
            ProgramInstruction::Fight => TxAction::Fight,
            ProgramInstruction::Claim => TxAction::Claim,
            ProgramInstruction::Equip { .. } => TxAction::Equip,
        }
    }

    fn method(&self) -> &'static str {
        match self {
            ProgramInstruction::InitPlayer(_) => "init_player",
            ProgramInstruction::Explore => "explore",
            ProgramInstruction::Fight => "fight",
            ProgramInstruction::Claim => "claim",
            ProgramInstruction::Equip { .. } => "equip",
        }
    }

    pub fn data(&self) -> Vec<u8> {
        let mut data = discriminator("global", self.method()).to_vec();
        match self {
            ProgramInstruction::InitPlayer(params) => {
                data.extend_from_slice(&[params.hp, params.atk, params.def])
            }
            ProgramInstruction::Equip {
                atk_bonus,
                def_bonus,
            } => data.extend_from_slice(&[*atk_bonus, *def_bonus]),
            _ => {}
        }
        data
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let (tag, args) = data.split_at_checked(8)?;
        let candidates = [
            ProgramInstruction::InitPlayer(InitParams::default()),
            ProgramInstruction::Explore,
            ProgramInstruction::Fight,
            ProgramInstruction::Claim,
            ProgramInstruction::Equip {
                atk_bonus: 0,
                def_bonus: 0,
            },
        ];
        let kind = candidates
            .into_iter()
            .find(|candidate| discriminator("global", candidate.method()) == tag)?;
        match (kind, args) {
            (ProgramInstruction::InitPlayer(_), &[hp, atk, def]) => {
                Some(ProgramInstruction::InitPlayer(InitParams { hp, atk, def }))
            }
            (ProgramInstruction::Equip { .. }, &[atk_bonus, def_bonus]) => {
                Some(ProgramInstruction::Equip {
                    atk_bonus,
                    def_bonus,
                })
            }
            (ProgramInstruction::InitPlayer(_) | ProgramInstruction::Equip { .. }, _) => None,
            (other, []) => Some(other),
            _ => None,
        }
    }

    /// Full instruction addressed at `player`, signed by `authority`.
    pub fn to_instruction(
        &self,
        program_id: Pubkey,
        authority: Pubkey,
        player: Pubkey,
    ) -> Instruction {
        let authority_meta = match self {
            // only init pays for the account, the rest just need the authority's signature
            ProgramInstruction::InitPlayer(_) => AccountMeta::new(authority, true),
            _ => AccountMeta::new_readonly(authority, true),
        };
        let mut accounts = vec![AccountMeta::new(player, false), authority_meta];
        if let ProgramInstruction::InitPlayer(_) = self {
            accounts.push(AccountMeta::new_readonly(system_program::id(), false));
        }
        Instruction::new_with_bytes(program_id, &self.data(), accounts)
    }
}

/// First signing account of `instruction`.
pub fn instruction_signer(instruction: &Instruction) -> Option<Pubkey> {
    instruction
        .accounts
        .iter()
        .find(|meta| meta.is_signer)
        .map(|meta| meta.pubkey)
}

/// Legacy transaction paid for and signed by `signer` alone.
pub fn build_transaction(
    instruction: &Instruction,
    signer: &dyn Signer,
    recent_blockhash: Hash,
) -> Result<Transaction, ClientError> {
    let payer = signer.pubkey();
    if instruction_signer(instruction).is_some_and(|key| key != payer) {
        return Err(ClientError::Signing(
            "instruction authority is not the connected wallet".into(),
        ));
    }
    let message = Message::new(std::slice::from_ref(instruction), Some(&payer));
    let mut transaction = Transaction::new_unsigned(message);
    let signers: Vec<&dyn Signer> = vec![signer];
    transaction
        .try_sign(&signers, recent_blockhash)
        .map_err(|e| ClientError::Signing(e.to_string()))?;
    Ok(transaction)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use solana_sdk::signature::Keypair;

    #[test]
    fn data__explore__is_bare_discriminator() {
        assert_eq!(
            ProgramInstruction::Explore.data(),
            vec![153, 32, 152, 245, 82, 135, 167, 2]
        );
    }

    #[test]
    fn data__init_player__appends_stats() {
        let data = ProgramInstruction::InitPlayer(InitParams {
            hp: 80,
            atk: 12,
            def: 3,
        })
        .data();

        assert_eq!(&data[..8], &[114, 27, 219, 144, 50, 15, 228, 66]);
        assert_eq!(&data[8..], &[80, 12, 3]);
    }

    #[test]
    fn decode__equip_data__recovers_bonuses() {
        let ix = ProgramInstruction::Equip {
            atk_bonus: 4,
            def_bonus: 2,
        };

        assert_eq!(ProgramInstruction::decode(&ix.data()), Some(ix));
    }

    #[test]
    fn decode__trailing_bytes_on_fight__is_rejected() {
        let mut data = ProgramInstruction::Fight.data();
        data.push(1);

        assert_eq!(ProgramInstruction::decode(&data), None);
    }

    #[test]
    fn to_instruction__init__adds_paying_authority_and_system_program() {
        // given
        let authority = Pubkey::new_unique();
        let player = Pubkey::new_unique();
        let program = Pubkey::new_unique();

        // when
        let ix = ProgramInstruction::InitPlayer(InitParams::default())
            .to_instruction(program, authority, player);

        // then
        assert_eq!(ix.program_id, program);
        assert_eq!(
            ix.accounts,
            vec![
                AccountMeta::new(player, false),
                AccountMeta::new(authority, true),
                AccountMeta::new_readonly(system_program::id(), false),
            ]
        );
        assert_eq!(instruction_signer(&ix), Some(authority));
    }

    #[test]
    fn to_instruction__explore__only_needs_authority_signature() {
        let authority = Pubkey::new_unique();
        let player = Pubkey::new_unique();

        let ix = ProgramInstruction::Explore.to_instruction(Pubkey::new_unique(), authority, player);

        assert_eq!(
            ix.accounts,
            vec![
                AccountMeta::new(player, false),
                AccountMeta::new_readonly(authority, true),
            ]
        );
    }

    #[test]
    fn build_transaction__wallet_authority__is_signed_by_payer() {
        // given
        let wallet = Keypair::new();
        let player = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let ix = ProgramInstruction::Explore.to_instruction(program, wallet.pubkey(), player);

        // when
        let tx = build_transaction(&ix, &wallet, Hash::new_unique()).unwrap();

        // then
        assert!(tx.verify().is_ok());
        assert_eq!(tx.message.account_keys, vec![wallet.pubkey(), player, program]);
        assert_eq!(tx.message.header.num_required_signatures, 1);
    }

    #[test]
    fn build_transaction__foreign_authority__is_refused() {
        let wallet = Keypair::new();
        let ix = ProgramInstruction::Claim.to_instruction(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
        );

        let err = build_transaction(&ix, &wallet, Hash::new_unique()).unwrap_err();

        assert!(matches!(err, ClientError::Signing(_)));
    }
}
