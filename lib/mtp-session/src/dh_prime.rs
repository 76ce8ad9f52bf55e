// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Validates the Diffie-Hellman prime a datacenter offers during the
//! handshake, per the checks documented in Telegram's MTProto security
//! guidelines: `dh_prime` and `(dh_prime - 1) / 2` must both be prime, and
//! `g` must generate a cyclic subgroup of the right order (a small,
//! generator-specific residue condition on `dh_prime`).
use num_bigint::BigUint;
use num_traits::identities::One;
use std::collections::HashSet;
use std::sync::Mutex;

/// External, internally-cached validator for the server-chosen DH prime.
/// A fresh [`CachingDhPrimeChecker`] already trusts Telegram's well-known
/// 2048-bit prime without running the (comparatively expensive)
/// primality test on it.
pub trait DhPrimeChecker: Send + Sync {
    fn check(&self, dh_prime: &BigUint, g: i32) -> bool;
}

/// Telegram's documented 2048-bit DH prime, trusted without re-checking.
const KNOWN_GOOD_PRIME_HEX: &str = "c71caeb9c6b1c9048e6c522f70f13f73980d40238e3e21c14934d037563d930f48198a0aa7c14058229493d22530f4dbfa336f6e0ac925139543aed44cce7c3720fd51f69458705ac68cd4fe6b6b13abdc9746512969328454f18faf8c595f642477fe96bb2a941d5bcd1d4ac8cc49880708fa9b378e3c4f3a9060bee67cf9a4a4a695811051907e162753b56b0f6b410dba74d8a84b2a14b3144e0ef1284754fd17ed950d5965b4b9dd46582db1178d169c6bc465b0d6ff9ca3928fef5b9ae4e418fc15e83ebea0f87fa9ff5eed70050ded2849f47bf959d956850ce929851f0d8115f635b105ee2e4e15d04b2454bf6f4fadf034b10403119cd8e3b92fcc5b";

pub struct CachingDhPrimeChecker {
    cache: Mutex<HashSet<Vec<u8>>>,
}

impl Default for CachingDhPrimeChecker {
    fn default() -> Self {
        let known = BigUint::parse_bytes(KNOWN_GOOD_PRIME_HEX.as_bytes(), 16)
            .expect("well-known DH prime constant is valid hex");
        let mut cache = HashSet::new();
        cache.insert(known.to_bytes_be());
        Self {
            cache: Mutex::new(cache),
        }
    }
}

impl DhPrimeChecker for CachingDhPrimeChecker {
    fn check(&self, dh_prime: &BigUint, g: i32) -> bool {
        let key = dh_prime.to_bytes_be();
        if self.cache.lock().unwrap().contains(&key) {
            return generator_residue_ok(dh_prime, g);
        }

        if !generator_residue_ok(dh_prime, g) {
            return false;
        }

        // "both p and (p-1)/2 are prime"
        if !is_probable_prime(dh_prime) {
            return false;
        }
        let half = (dh_prime - 1u32) / 2u32;
        if !is_probable_prime(&half) {
            return false;
        }

        self.cache.lock().unwrap().insert(key);
        true
    }
}

/// The generator-specific residue conditions from the security guidelines.
/// `g` values outside the documented set are rejected outright.
fn generator_residue_ok(dh_prime: &BigUint, g: i32) -> bool {
    let rem = |m: u32| (dh_prime % m).to_u32_digits().first().copied().unwrap_or(0);
    match g {
        2 => rem(8) == 7,
        3 => rem(3) == 2,
        4 => true,
        5 => matches!(rem(5), 1 | 4),
        6 => matches!(rem(24), 19 | 23),
        7 => matches!(rem(7), 3 | 5 | 6),
        _ => false,
    }
}

/// Miller-Rabin with a fixed, generous round count; adequate for rejecting
/// a maliciously-chosen composite `dh_prime` without pulling in a dedicated
/// primality-testing crate the rest of the workspace doesn't otherwise need.
fn is_probable_prime(n: &BigUint) -> bool {
    let zero = BigUint::from(0u32);
    let one = BigUint::one();
    let two = BigUint::from(2u32);

    if *n < two {
        return false;
    }
    if *n == two {
        return true;
    }
    if n % &two == zero {
        return false;
    }

    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut r = 0u32;
    while &d % &two == zero {
        d /= &two;
        r += 1;
    }

    // Small fixed witnesses are sufficient for numbers of this size in
    // practice; this is a defense against a misbehaving/malicious server,
    // not a general-purpose primality oracle.
    for witness in [2u32, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37] {
        let a = BigUint::from(witness);
        if a >= *n {
            continue;
        }
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        let mut passed = false;
        for _ in 0..r.saturating_sub(1) {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                passed = true;
                break;
            }
        }
        if !passed {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_known_good_prime_without_testing() {
        let checker = CachingDhPrimeChecker::default();
        let known = BigUint::parse_bytes(KNOWN_GOOD_PRIME_HEX.as_bytes(), 16).unwrap();
        assert!(checker.check(&known, 3));
    }

    #[test]
    fn rejects_an_even_number() {
        let checker = CachingDhPrimeChecker::default();
        assert!(!checker.check(&BigUint::from(100u32), 3));
    }

    #[test]
    fn rejects_a_bad_generator_residue() {
        let checker = CachingDhPrimeChecker::default();
        // 23 mod 8 == 7 so g=2 would pass the residue check but g=3 needs
        // p mod 3 == 2; 23 mod 3 == 2 so that one actually passes too -
        // use a prime picked to fail g=3's residue instead.
        let p = BigUint::from(7u32); // 7 mod 3 == 1, fails g=3's condition
        assert!(!checker.check(&p, 3));
    }

    #[test]
    fn miller_rabin_rejects_small_composites() {
        assert!(!is_probable_prime(&BigUint::from(91u32)));
        assert!(is_probable_prime(&BigUint::from(97u32)));
    }
}
