//! Question generation for modular-inverse rounds
//!
//! A question asks for the inverse of `a` modulo a prime `p`. Because `p` is
//! prime and `2 <= a <= p - 1`, the inverse always exists, so every generated
//! round is solvable by construction.

use crate::error::ServerError;
use rand::Rng;
use shared::Difficulty;
use tokio::time::Instant;

/// One question instance within a game.
#[derive(Debug, Clone)]
pub struct Round {
    /// Prime modulus.
    pub p: u64,
    /// Base whose inverse is asked for.
    pub a: u64,
    /// Modular inverse of `a` mod `p`.
    pub answer: u64,
    /// Monotonic start time, used only for elapsed-time telemetry.
    pub started_at: Instant,
}

/// Lowest prime ever used as a modulus. Keeps questions out of the trivial
/// 2/3/5/7 range where inverses can be read off by eye.
const MIN_PRIME: u64 = 11;

/// Trial-division primality check. The moduli here are tiny (< 200), so
/// nothing faster is warranted.
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n < 4 {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let mut i = 5;
    while i * i <= n {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}

/// All primes in the inclusive range `[start, end]`.
pub fn primes_in_range(start: u64, end: u64) -> Vec<u64> {
    (start..=end).filter(|&n| is_prime(n)).collect()
}

/// Extended Euclidean algorithm: returns `(g, x, y)` with `a*x + b*y == g`.
fn extended_gcd(a: i64, b: i64) -> (i64, i64, i64) {
    if a == 0 {
        return (b, 0, 1);
    }
    let (g, x, y) = extended_gcd(b % a, a);
    (g, y - (b / a) * x, x)
}

/// Modular inverse of `a` mod `m`, or `None` when `gcd(a, m) != 1`.
pub fn mod_inverse(a: u64, m: u64) -> Option<u64> {
    let (g, x, _) = extended_gcd(a as i64, m as i64);
    if g != 1 {
        return None;
    }
    let m = m as i64;
    Some(((x % m + m) % m) as u64)
}

/// Generates a solvable round for the given difficulty tier.
///
/// The prime is drawn uniformly from the primes in `[11, bound - 1]` and the
/// base uniformly from `[2, p - 1]`. An empty prime range means the difficulty
/// table itself is broken, which is fatal configuration, not a user error.
pub fn generate(difficulty: Difficulty) -> Result<Round, ServerError> {
    let bound = difficulty.prime_bound();
    let primes = primes_in_range(MIN_PRIME, bound.saturating_sub(1));
    if primes.is_empty() {
        return Err(ServerError::EmptyPrimeRange { bound });
    }

    let mut rng = rand::thread_rng();
    let p = primes[rng.gen_range(0..primes.len())];
    let a = rng.gen_range(2..p);

    // p prime and 2 <= a < p, so the inverse exists.
    let answer = mod_inverse(a, p).ok_or(ServerError::EmptyPrimeRange { bound })?;

    Ok(Round {
        p,
        a,
        answer,
        started_at: Instant::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_prime_small_values() {
        assert!(!is_prime(0));
        assert!(!is_prime(1));
        assert!(is_prime(2));
        assert!(is_prime(3));
        assert!(!is_prime(4));
        assert!(is_prime(5));
        assert!(!is_prime(9));
        assert!(is_prime(11));
        assert!(!is_prime(49));
        assert!(is_prime(197));
    }

    #[test]
    fn test_primes_in_range() {
        assert_eq!(primes_in_range(11, 30), vec![11, 13, 17, 19, 23, 29]);
        assert!(primes_in_range(24, 28).is_empty());
    }

    #[test]
    fn test_mod_inverse_known_values() {
        // 3 * 4 = 12 = 1 (mod 11)
        assert_eq!(mod_inverse(3, 11), Some(4));
        // 7 * 8 = 56 = 1 (mod 11)
        assert_eq!(mod_inverse(7, 11), Some(8));
        // gcd(6, 9) = 3, no inverse
        assert_eq!(mod_inverse(6, 9), None);
    }

    #[test]
    fn test_mod_inverse_exhaustive_small_primes() {
        for p in [11u64, 13, 47, 97, 199] {
            for a in 2..p {
                let inv = mod_inverse(a, p).expect("inverse must exist for prime modulus");
                assert_eq!(a * inv % p, 1, "a={} p={}", a, p);
                assert!(inv < p);
            }
        }
    }

    #[test]
    fn test_generate_satisfies_contract() {
        // (a * answer) mod p == 1, p prime, 2 <= a <= p - 1.
        for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            for _ in 0..200 {
                let round = generate(difficulty).unwrap();
                assert!(is_prime(round.p));
                assert!(round.p >= MIN_PRIME);
                assert!(round.p < difficulty.prime_bound());
                assert!(round.a >= 2 && round.a < round.p);
                assert_eq!(round.a * round.answer % round.p, 1);
            }
        }
    }

    #[test]
    fn test_generate_easy_stays_under_fifty() {
        for _ in 0..50 {
            let round = generate(Difficulty::Easy).unwrap();
            assert!(round.p <= 50);
        }
    }
}
