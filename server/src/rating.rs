//! Multiplayer Elo-style rating updates for ranked games
//!
//! The update is the standard pairwise Elo expectation, normalized by the
//! number of opponents so that the K factor bounds the swing of a game at 32
//! points regardless of player count. A tie for first place yields zero
//! deltas for everyone: symmetric outcomes should not move ratings.

use std::collections::HashMap;

const K_FACTOR: f64 = 32.0;

/// Expected score of a player rated `r_i` against one rated `r_j`.
fn expected_score(r_i: f64, r_j: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((r_j - r_i) / 400.0))
}

/// Computes per-player rating deltas from final scores and prior ratings.
///
/// Returns an empty map for fewer than two players. When the top score is
/// shared, every player gets an explicit zero delta.
pub fn compute_deltas(
    scores: &HashMap<String, i32>,
    old_ratings: &HashMap<String, i32>,
) -> HashMap<String, i32> {
    let players: Vec<&String> = scores.keys().collect();
    let n = players.len();
    if n < 2 {
        return HashMap::new();
    }

    let max_score = scores.values().copied().max().unwrap_or(0);
    let winners = scores.values().filter(|&&s| s == max_score).count();
    if winners > 1 {
        return players.iter().map(|p| ((*p).clone(), 0)).collect();
    }

    let mut deltas = HashMap::new();
    for &i in &players {
        let s_i = scores[i];
        let r_i = f64::from(old_ratings.get(i).copied().unwrap_or(shared::DEFAULT_RATING));

        let mut actual = 0.0;
        let mut expected = 0.0;
        for &j in &players {
            if i == j {
                continue;
            }
            let s_j = scores[j];
            if s_i > s_j {
                actual += 1.0;
            } else if s_i == s_j {
                actual += 0.5;
            }
            let r_j = f64::from(old_ratings.get(j).copied().unwrap_or(shared::DEFAULT_RATING));
            expected += expected_score(r_i, r_j);
        }

        let norm = (n - 1) as f64;
        let delta = K_FACTOR * (actual / norm - expected / norm);
        deltas.insert(i.clone(), delta.round() as i32);
    }

    deltas
}
