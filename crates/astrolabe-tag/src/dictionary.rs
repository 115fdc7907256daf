//! The embedded tag16h5 dictionary and its rotation-aware matcher.

/// A fixed fiducial dictionary.
///
/// `codes` pack the inner `marker_size × marker_size` bits per id, row-major
/// with **black = 1**.
#[derive(Clone, Copy, Debug)]
pub struct Dictionary {
    pub name: &'static str,
    pub marker_size: usize,
    pub codes: &'static [u64],
}

impl Dictionary {
    #[inline]
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }
}

/// tag16h5: 4x4 inner bits, 30 ids, minimum Hamming distance 5.
pub const TAG16H5: Dictionary = Dictionary {
    name: "tag16h5",
    marker_size: 4,
    codes: &[
        0x231b, 0x2ea5, 0x346a, 0x45b9, 0x79a6, 0x7f6b, 0xb358, 0xe745, 0xfe59, 0x156d, 0x380b,
        0xf0ab, 0x0d84, 0x4736, 0x8c72, 0xaf10, 0x093c, 0x93b4, 0xa503, 0x468f, 0xe137, 0x5795,
        0x381f, 0x621b, 0x97b6, 0x499b, 0xace3, 0xf3a1, 0xfa36, 0xc275,
    ],
};

/// A dictionary match for an observed code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    /// Tag id in the dictionary.
    pub id: u32,
    /// Rotation `0..=3` such that `observed == rotate(dict_code, rotation)`.
    pub rotation: u8,
    /// Hamming distance after rotation.
    pub hamming: u8,
}

/// Brute-force matcher over all ids and rotations.
///
/// With 30 codes and 4 rotations the search is 120 XORs; precomputing the
/// rotations keeps the per-frame cost at popcounts only.
#[derive(Clone, Debug)]
pub struct Matcher {
    dict: Dictionary,
    max_hamming: u8,
    rotated: Vec<[u64; 4]>,
}

impl Matcher {
    pub fn new(dict: Dictionary, max_hamming: u8) -> Self {
        let mut rotated = Vec::with_capacity(dict.codes.len());
        for &base in dict.codes {
            rotated.push([
                rotate_code_u64(base, dict.marker_size, 0),
                rotate_code_u64(base, dict.marker_size, 1),
                rotate_code_u64(base, dict.marker_size, 2),
                rotate_code_u64(base, dict.marker_size, 3),
            ]);
        }
        Self {
            dict,
            max_hamming,
            rotated,
        }
    }

    #[inline]
    pub fn dictionary(&self) -> Dictionary {
        self.dict
    }

    /// Find the best match within `max_hamming`.
    pub fn match_code(&self, observed: u64) -> Option<Match> {
        let mut best: Option<Match> = None;

        for (id, rots) in self.rotated.iter().enumerate() {
            for (rot, &cand) in rots.iter().enumerate() {
                let h = (observed ^ cand).count_ones() as u8;
                if h > self.max_hamming {
                    continue;
                }
                let m = Match {
                    id: id as u32,
                    rotation: rot as u8,
                    hamming: h,
                };
                match best {
                    None => best = Some(m),
                    Some(prev) if m.hamming < prev.hamming => {
                        best = Some(m);
                        if m.hamming == 0 {
                            return best;
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        best
    }
}

/// Rotate a code stored in row-major bits: `idx = y * n + x`.
pub fn rotate_code_u64(code: u64, n: usize, rot: u8) -> u64 {
    let rot = rot & 3;
    if rot == 0 {
        return code;
    }

    let mut out = 0u64;
    for y in 0..n {
        for x in 0..n {
            let (sx, sy) = match rot {
                1 => (y, n - 1 - x),
                2 => (n - 1 - x, n - 1 - y),
                _ => (n - 1 - y, x),
            };
            out |= ((code >> (sy * n + sx)) & 1) << (y * n + x);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_four_times_is_identity() {
        let code = 0x231b_u64;
        let mut r = code;
        for _ in 0..4 {
            r = rotate_code_u64(r, 4, 1);
        }
        assert_eq!(code, r);
    }

    #[test]
    fn matcher_finds_rotated_code() {
        let matcher = Matcher::new(TAG16H5, 0);
        let observed = rotate_code_u64(TAG16H5.codes[7], 4, 3);
        let m = matcher.match_code(observed).expect("match");
        assert_eq!(m.id, 7);
        assert_eq!(m.rotation, 3);
        assert_eq!(m.hamming, 0);
    }

    #[test]
    fn matcher_tolerates_one_flipped_bit() {
        let matcher = Matcher::new(TAG16H5, 1);
        let observed = TAG16H5.codes[0] ^ (1 << 9);
        let m = matcher.match_code(observed).expect("match");
        assert_eq!(m.id, 0);
        assert_eq!(m.hamming, 1);
    }

    #[test]
    fn garbage_does_not_match() {
        let matcher = Matcher::new(TAG16H5, 1);
        assert_eq!(matcher.match_code(0xaaaa), None);
    }

    #[test]
    fn codes_are_well_separated() {
        // Minimum pairwise Hamming distance across rotations must exceed
        // twice the correction budget used by the detector.
        let matcher = Matcher::new(TAG16H5, 64);
        for (i, &a) in TAG16H5.codes.iter().enumerate() {
            let m = matcher.match_code(a).expect("self match");
            assert_eq!(m.id as usize, i);
            assert_eq!(m.hamming, 0);
        }
    }
}
