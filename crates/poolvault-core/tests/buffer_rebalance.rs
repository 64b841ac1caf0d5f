//! Buffer behaviour over longer sequences: rebalancing after a one-sided
//! wrap, yield-bearing wrappers, and value conservation under random
//! wrap / unwrap traffic, including amounts the buffer cannot serve.

use poolvault_core::Vault;
use poolvault_core::testing::{self, ADMIN, ALICE, BOB, DAI, WDAI, fp};
use poolvault_types::{
    Address, BufferWrapOrUnwrapParams, Result, SwapKind, U256, VaultEvent, WrappingDirection,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 10^(decimals / 2) for an 18-decimal token.
fn drift_bound() -> U256 {
    U256::from(1_000_000_000u64)
}

fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b { a - b } else { b - a }
}

/// Buffer over WDAI holding `underlying` DAI plus the WDAI worth as much.
fn balanced_buffer(vault: &mut Vault, underlying: U256) {
    let wrapped = vault
        .world()
        .wrapper(WDAI)
        .unwrap()
        .convert_to_shares(&vault.world().bank, underlying)
        .unwrap();
    vault
        .unlock(ALICE, |v| {
            v.initialize_buffer(ALICE, WDAI, underlying, wrapped, U256::ZERO, ALICE)?;
            testing::pay_in(v, ALICE, ALICE, &[DAI, WDAI], &[underlying, wrapped])
        })
        .unwrap();
}

/// Prepay generously in the token going in, run the wrap or unwrap, and
/// hand back whatever the session owes `BOB`.
fn wrap_or_unwrap(vault: &mut Vault, params: &BufferWrapOrUnwrapParams) -> Result<()> {
    let (token_in, token_out) = match params.direction {
        WrappingDirection::Wrap => (DAI, WDAI),
        WrappingDirection::Unwrap => (WDAI, DAI),
    };
    let prepaid = params.amount_given_raw * U256::from(2u64);
    vault.unlock(BOB, |v| {
        testing::pay_in(v, BOB, BOB, &[token_in], &[prepaid])?;
        v.erc4626_buffer_wrap_or_unwrap(BOB, params)?;
        for token in [token_in, token_out] {
            let owed = v.token_delta(BOB, token);
            testing::pay_out(v, BOB, BOB, &[token], &[owed.unsigned_abs()])?;
        }
        Ok(())
    })
}

fn params(kind: SwapKind, direction: WrappingDirection, amount: U256) -> BufferWrapOrUnwrapParams {
    BufferWrapOrUnwrapParams {
        kind,
        direction,
        wrapped_token: WDAI,
        amount_given_raw: amount,
        limit_raw: match kind {
            SwapKind::ExactIn => U256::ZERO,
            SwapKind::ExactOut => U256::MAX,
        },
    }
}

#[test]
fn rebalance_restores_even_split_after_one_sided_wrap() {
    let mut vault = testing::vault_with_tokens();
    balanced_buffer(&mut vault, fp(1_000_000));

    wrap_or_unwrap(
        &mut vault,
        &params(SwapKind::ExactIn, WrappingDirection::Wrap, fp(500_000)),
    )
    .unwrap();
    let skewed = vault.get_buffer_balance(WDAI).unwrap();
    assert_eq!(skewed.underlying_raw, fp(1_500_000));

    vault.unlock(ADMIN, |v| v.rebalance(ADMIN, WDAI)).unwrap();

    let balance = vault.get_buffer_balance(WDAI).unwrap();
    assert!(abs_diff(balance.underlying_raw, fp(1_000_000)) <= drift_bound());
    assert!(abs_diff(balance.wrapped_raw, fp(1_000_000)) <= drift_bound());
    vault.verify_reserves(DAI).unwrap();
    vault.verify_reserves(WDAI).unwrap();
}

#[test]
fn rebalance_with_yield_bearing_wrapper() {
    let mut vault = testing::vault_with_tokens();
    // 4M shares backed by 4.4M DAI: one WDAI is worth 1.1 DAI.
    vault.world_mut().donate_yield(WDAI, ALICE, fp(400_000)).unwrap();
    balanced_buffer(&mut vault, fp(1_000_000));

    wrap_or_unwrap(
        &mut vault,
        &params(SwapKind::ExactIn, WrappingDirection::Unwrap, fp(300_000)),
    )
    .unwrap();
    vault.unlock(ADMIN, |v| v.rebalance(ADMIN, WDAI)).unwrap();

    let balance = vault.get_buffer_balance(WDAI).unwrap();
    let wrapper = vault.world().wrapper(WDAI).unwrap();
    let wrapped_value = wrapper
        .preview_redeem(&vault.world().bank, balance.wrapped_raw)
        .unwrap();
    assert!(abs_diff(balance.underlying_raw, wrapped_value) <= drift_bound());
    assert!(matches!(
        vault.events().last(),
        Some(VaultEvent::BufferRebalanced {
            direction: WrappingDirection::Unwrap,
            ..
        })
    ));
}

#[test]
fn second_rebalance_is_a_noop() {
    let mut vault = testing::vault_with_tokens();
    balanced_buffer(&mut vault, fp(1_000_000));
    wrap_or_unwrap(
        &mut vault,
        &params(SwapKind::ExactOut, WrappingDirection::Wrap, fp(250_000)),
    )
    .unwrap();

    vault.unlock(ADMIN, |v| v.rebalance(ADMIN, WDAI)).unwrap();
    let first = vault.get_buffer_balance(WDAI).unwrap();
    let events = vault.events().len();

    vault.unlock(ADMIN, |v| v.rebalance(ADMIN, WDAI)).unwrap();
    assert_eq!(vault.get_buffer_balance(WDAI).unwrap(), first);
    assert_eq!(vault.events().len(), events);
}

#[test]
fn random_traffic_never_drains_buffer_value() {
    let mut vault = testing::vault_with_tokens();
    vault.world_mut().donate_yield(WDAI, ALICE, fp(400_000)).unwrap();
    balanced_buffer(&mut vault, fp(1_000_000));
    let mut rng = StdRng::seed_from_u64(42);

    let mut value = vault.get_buffer_value_in_underlying(WDAI).unwrap();
    for _ in 0..200 {
        let kind = if rng.gen_bool(0.5) { SwapKind::ExactIn } else { SwapKind::ExactOut };
        let direction = if rng.gen_bool(0.5) {
            WrappingDirection::Wrap
        } else {
            WrappingDirection::Unwrap
        };
        let amount = U256::from(rng.gen_range(1_000_000_000_000u128..100_000_000_000_000_000_000_000u128));

        wrap_or_unwrap(&mut vault, &params(kind, direction, amount)).unwrap();

        let after = vault.get_buffer_value_in_underlying(WDAI).unwrap();
        assert!(after >= value, "{direction} {kind} of {amount} lost buffer value");
        value = after;
        for token in [DAI, WDAI] {
            vault.verify_reserves(token).unwrap();
        }
    }

    // Owner shares still redeem for at least what went in.
    let shares = vault.get_buffer_owner_shares(WDAI, ALICE);
    let total = vault.get_buffer_total_shares(WDAI);
    assert!(shares < total);
    assert!(vault.get_buffer_owner_shares(WDAI, Address::ZERO) > U256::ZERO);
}

#[test]
fn oversized_traffic_with_rebalances_conserves_value() {
    let mut vault = testing::vault_with_tokens();
    vault.world_mut().donate_yield(WDAI, ALICE, fp(400_000)).unwrap();
    {
        let world = vault.world_mut();
        world.bank.mint(DAI, BOB, fp(10_000_000)).unwrap();
        let wdai = world.wrapper(WDAI).unwrap();
        wdai.deposit(&mut world.bank, BOB, fp(6_000_000), BOB).unwrap();
    }
    balanced_buffer(&mut vault, fp(1_000_000));
    let tolerance = vault.config().buffer_rebalance_tolerance;
    let mut rng = StdRng::seed_from_u64(1_729);

    let mut value = vault.get_buffer_value_in_underlying(WDAI).unwrap();
    for step in 0..150 {
        let kind = if rng.gen_bool(0.5) { SwapKind::ExactIn } else { SwapKind::ExactOut };
        let direction = if rng.gen_bool(0.5) {
            WrappingDirection::Wrap
        } else {
            WrappingDirection::Unwrap
        };
        // Up to 1.2M against a 1M buffer: some of these cannot be served
        // from the buffer and go through the wrapper whole.
        let amount = U256::from(rng.gen_range(1_000_000_000_000u128..1_200_000_000_000_000_000_000_000u128));

        wrap_or_unwrap(&mut vault, &params(kind, direction, amount)).unwrap();
        let after = vault.get_buffer_value_in_underlying(WDAI).unwrap();
        assert!(after >= value, "step {step}: {direction} {kind} of {amount} lost buffer value");
        value = after;

        if step % 3 == 0 {
            vault.unlock(ADMIN, |v| v.rebalance(ADMIN, WDAI)).unwrap();
            let after = vault.get_buffer_value_in_underlying(WDAI).unwrap();
            assert!(
                after + tolerance >= value,
                "step {step}: rebalance lost {} units",
                value - after
            );
            value = after;
        }

        for token in [DAI, WDAI] {
            vault.verify_reserves(token).unwrap();
        }
    }

    let count = |within: bool| {
        vault
            .events()
            .events()
            .iter()
            .filter(|event| matches!(event, VaultEvent::Wrapped { within_buffer, .. } if *within_buffer == within))
            .count()
    };
    assert!(count(false) > 0, "no operation went through the wrapper");
    assert!(count(true) > 0);
    assert!(vault
        .events()
        .events()
        .iter()
        .any(|event| matches!(event, VaultEvent::BufferRebalanced { .. })));
}
