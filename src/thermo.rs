//! Hybridization melting-temperature prediction.
//!
//! Nearest-neighbor model with the SantaLucia (1998) unified parameter set
//! and a choice of salt correction (SantaLucia entropy correction or the
//! Owczarzy reciprocal-temperature correction). Temperatures are returned in
//! Kelvin; display code subtracts 273.15.
//!
//! [`TmParams::two_tm`] scores the duplex formed by a canonical primer over
//! an observed binding site: only stacks whose two base pairs are both
//! matched contribute, so mismatched sites melt lower. Tm here is purely
//! informational and never used to reject an amplicon.

use crate::pattern::iupac_matches;

/// Default primer concentration (mol/L).
pub const DEF_CONC_PRIMERS: f64 = 2.0e-7;

/// Default monovalent salt concentration (mol/L).
pub const DEF_SALT: f64 = 0.05;

/// Gas constant in cal/(mol·K).
const R_GAS: f64 = 1.987;

/// Salt correction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltMethod {
    SantaLucia,
    Owczarzy,
}

impl SaltMethod {
    /// Numeric selector as exposed on the command line (1 or 2).
    pub fn from_code(code: u32) -> Option<SaltMethod> {
        match code {
            1 => Some(SaltMethod::SantaLucia),
            2 => Some(SaltMethod::Owczarzy),
            _ => None,
        }
    }
}

/// Thermodynamic run parameters, fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct TmParams {
    /// Primer concentration in mol/L.
    pub primer_conc: f64,
    /// Monovalent cation concentration in mol/L.
    pub salt: f64,
    pub method: SaltMethod,
}

impl Default for TmParams {
    fn default() -> Self {
        TmParams {
            primer_conc: DEF_CONC_PRIMERS,
            salt: DEF_SALT,
            method: SaltMethod::SantaLucia,
        }
    }
}

/// Unified NN stack parameters: (dinucleotide, dH kcal/mol, dS cal/(mol·K)).
/// Keyed on the 5'→3' top strand; the table already folds in the symmetric
/// pairs (AA covers TT read the other way, etc.).
const NN: &[(&[u8; 2], f64, f64)] = &[
    (b"AA", -7.9, -22.2),
    (b"TT", -7.9, -22.2),
    (b"AT", -7.2, -20.4),
    (b"TA", -7.2, -21.3),
    (b"CA", -8.5, -22.7),
    (b"TG", -8.5, -22.7),
    (b"GT", -8.4, -22.4),
    (b"AC", -8.4, -22.4),
    (b"CT", -7.8, -21.0),
    (b"AG", -7.8, -21.0),
    (b"GA", -8.2, -22.2),
    (b"TC", -8.2, -22.2),
    (b"CG", -10.6, -27.2),
    (b"GC", -9.8, -24.4),
    (b"GG", -8.0, -19.9),
    (b"CC", -8.0, -19.9),
];

fn stack_params(a: u8, b: u8) -> Option<(f64, f64)> {
    NN.iter()
        .find(|(k, _, _)| k[0] == a && k[1] == b)
        .map(|(_, dh, ds)| (*dh, *ds))
}

/// Duplex initiation terms per terminal base pair.
fn initiation(base: u8) -> (f64, f64) {
    match base {
        b'G' | b'C' => (0.1, -2.8),
        _ => (2.3, 4.1),
    }
}

impl TmParams {
    /// Tm of a primer against its perfect complement.
    pub fn self_tm(&self, oligo: &[u8]) -> f64 {
        self.two_tm(oligo, oligo)
    }

    /// Tm of the duplex formed by the `canonical` primer over the `observed`
    /// binding site (both written in primer orientation, equal length).
    /// Mismatched positions break the stacks they touch.
    ///
    /// Returns Kelvin; 0.0 when no stack pairs at all.
    pub fn two_tm(&self, observed: &[u8], canonical: &[u8]) -> f64 {
        let n = observed.len().min(canonical.len());
        if n < 2 {
            return 0.0;
        }

        // A position is paired when the observed base is one of the bases
        // the canonical (possibly ambiguous) symbol stands for.
        let paired: Vec<bool> = (0..n)
            .map(|i| iupac_matches(canonical[i], observed[i]))
            .collect();

        let mut dh = 0.0; // kcal/mol
        let mut ds = 0.0; // cal/(mol K)
        let mut stacks = 0usize;
        for i in 0..n - 1 {
            if paired[i] && paired[i + 1] {
                if let Some((h, s)) = stack_params(
                    observed[i].to_ascii_uppercase(),
                    observed[i + 1].to_ascii_uppercase(),
                ) {
                    dh += h;
                    ds += s;
                    stacks += 1;
                }
            }
        }
        if stacks == 0 {
            return 0.0;
        }

        let (h0, s0) = initiation(observed[0].to_ascii_uppercase());
        let (h1, s1) = initiation(observed[n - 1].to_ascii_uppercase());
        dh += h0 + h1;
        ds += s0 + s1;

        let dh_cal = dh * 1000.0;
        let conc_term = R_GAS * (self.primer_conc / 4.0).ln();

        match self.method {
            SaltMethod::SantaLucia => {
                let ds_salt = ds + 0.368 * (n as f64 - 1.0) * self.salt.ln();
                dh_cal / (ds_salt + conc_term)
            }
            SaltMethod::Owczarzy => {
                let tm_1m = dh_cal / (ds + conc_term);
                let fgc = observed[..n]
                    .iter()
                    .filter(|b| matches!(b.to_ascii_uppercase(), b'G' | b'C'))
                    .count() as f64
                    / n as f64;
                let ln_na = self.salt.ln();
                let inv = 1.0 / tm_1m + (4.29 * fgc - 3.95) * 1e-5 * ln_na + 9.40e-6 * ln_na * ln_na;
                1.0 / inv
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &[u8] = b"AGCTAGCTAGGATCCAGCTA";

    #[test]
    fn self_tm_in_plausible_range() {
        let p = TmParams::default();
        let tm_c = p.self_tm(MIXED) - 273.15;
        assert!((30.0..90.0).contains(&tm_c), "Tm {tm_c} out of range");
    }

    #[test]
    fn gc_rich_melts_higher_than_at_rich() {
        let p = TmParams::default();
        let gc = p.self_tm(b"GCGCGGCCGCGCGGCCGCGC");
        let at = p.self_tm(b"ATATAATTATATAATTATAT");
        assert!(gc > at);
    }

    #[test]
    fn mismatch_lowers_tm() {
        let p = TmParams::default();
        let canonical = MIXED;
        let mut observed = canonical.to_vec();
        observed[9] = b'T'; // G -> T
        assert!(p.two_tm(&observed, canonical) < p.self_tm(canonical));
    }

    #[test]
    fn identical_sequences_give_self_tm() {
        let p = TmParams::default();
        assert_eq!(p.two_tm(MIXED, MIXED), p.self_tm(MIXED));
    }

    #[test]
    fn ambiguous_canonical_pairs_without_penalty() {
        let p = TmParams::default();
        let canonical = b"AGCTAGCTAGRATCCAGCTA"; // R covers the G
        assert_eq!(p.two_tm(MIXED, canonical), p.self_tm(MIXED));
    }

    #[test]
    fn more_salt_raises_tm_under_both_methods() {
        for method in [SaltMethod::SantaLucia, SaltMethod::Owczarzy] {
            let low = TmParams { salt: 0.01, method, ..Default::default() };
            let high = TmParams { salt: 0.5, method, ..Default::default() };
            assert!(high.self_tm(MIXED) > low.self_tm(MIXED), "{method:?}");
        }
    }

    #[test]
    fn degenerate_inputs_are_total() {
        let p = TmParams::default();
        assert_eq!(p.two_tm(b"A", b"A"), 0.0);
        assert_eq!(p.two_tm(b"ACGT", b"TGCA"), 0.0); // nothing pairs
    }
}
