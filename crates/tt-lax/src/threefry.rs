//! Counter-based ThreeFry2x32 generator used for categorical sampling.
//!
//! Salmon et al., "Parallel Random Numbers: As Easy as 1, 2, 3" (SC'11).

/// Skein rotation constants for the two-word variant.
const ROTATIONS: [u32; 8] = [13, 15, 26, 6, 17, 29, 16, 24];

const NUM_ROUNDS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PRNGKey(pub [u32; 2]);

/// Encrypts `data` under `key` with [`NUM_ROUNDS`] rounds.
#[must_use]
pub fn threefry2x32(key: [u32; 2], data: [u32; 2]) -> [u32; 2] {
    const KS_PARITY: u32 = 0x1BD1_1BDA;

    let ks2 = key[0] ^ key[1] ^ KS_PARITY;
    let schedule = [key[0], key[1], ks2];

    let mut x0 = data[0].wrapping_add(key[0]);
    let mut x1 = data[1].wrapping_add(key[1]);

    for round in 0..NUM_ROUNDS {
        x0 = x0.wrapping_add(x1);
        x1 = x1.rotate_left(ROTATIONS[round % 8]) ^ x0;

        if (round + 1) % 4 == 0 {
            let injection = (round + 1) / 4;
            x0 = x0.wrapping_add(schedule[injection % 3]);
            x1 = x1.wrapping_add(schedule[(injection + 1) % 3].wrapping_add(injection as u32));
        }
    }

    [x0, x1]
}

/// Key from a 64-bit seed: high word first.
#[must_use]
pub fn random_key(seed: u64) -> PRNGKey {
    PRNGKey([(seed >> 32) as u32, seed as u32])
}

#[must_use]
pub fn random_split(key: PRNGKey) -> (PRNGKey, PRNGKey) {
    (
        PRNGKey(threefry2x32(key.0, [0, 0])),
        PRNGKey(threefry2x32(key.0, [0, 1])),
    )
}

#[must_use]
pub fn random_fold_in(key: PRNGKey, data: u32) -> PRNGKey {
    PRNGKey(threefry2x32(key.0, [data, 0]))
}

/// Uniform draw in `[0, 1)` for stream position `counter` under `key`.
#[must_use]
pub fn uniform_f64(key: PRNGKey, counter: u64) -> f64 {
    let [hi, lo] = threefry2x32(key.0, [(counter >> 32) as u32, counter as u32]);
    let bits = ((u64::from(hi) << 32) | u64::from(lo)) >> 11;
    bits as f64 / (1_u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threefry_is_deterministic_and_key_sensitive() {
        let a = threefry2x32([0, 0], [0, 0]);
        assert_eq!(a, threefry2x32([0, 0], [0, 0]));
        assert_ne!(a, [0, 0]);
        assert_ne!(a, threefry2x32([0, 1], [0, 0]));
        assert_ne!(a, threefry2x32([0, 0], [0, 1]));
    }

    #[test]
    fn split_and_fold_in_derive_distinct_keys() {
        let key = random_key(42);
        assert_eq!(key.0, [0, 42]);
        let (left, right) = random_split(key);
        assert_ne!(left, right);
        assert_ne!(left, key);
        assert_ne!(random_fold_in(key, 0), random_fold_in(key, 1));
    }

    #[test]
    fn uniform_draws_stay_in_unit_interval() {
        let key = random_key(7);
        let draws: Vec<f64> = (0..2_000).map(|i| uniform_f64(key, i)).collect();
        assert!(draws.iter().all(|u| (0.0..1.0).contains(u)));
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        assert!((mean - 0.5).abs() < 0.05, "mean {mean} too far from 0.5");
    }
}
