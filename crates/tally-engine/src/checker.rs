//! Cross-pillar checksum resolution for a single file.
//!
//! Pure logic: the steps in [`crate::steps`] feed it the stored records of
//! one file and apply the result. Disagreement is never settled by vote. Any
//! two EXISTING pillars with different checksums put every involved record in
//! ERROR.

use std::collections::{BTreeMap, BTreeSet};

use tally_types::{Checksum, FileRecord, PillarId};

/// How the checksums of one file's EXISTING records relate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumResolution {
    /// Every record with a checksum carries the same one.
    Agreed {
        checksum: Checksum,
        pillars: BTreeSet<PillarId>,
    },
    /// At least two distinct checksums.
    Disagreed {
        checksums: BTreeMap<PillarId, Checksum>,
    },
    /// No EXISTING record has a checksum.
    Unresolvable,
}

/// Result of [`evaluate_checksums`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEvaluation {
    pub resolution: ChecksumResolution,
    /// EXISTING records without a checksum.
    pub lacking: Vec<PillarId>,
}

/// Resolve the checksums of one file's records.
///
/// Only EXISTING records take part; MISSING placeholders are ignored.
pub fn evaluate_checksums(records: &[FileRecord]) -> ChecksumEvaluation {
    let mut checksums = BTreeMap::new();
    let mut lacking = Vec::new();
    for record in records.iter().filter(|r| r.is_existing()) {
        match &record.checksum {
            Some(checksum) => {
                checksums.insert(record.pillar_id.clone(), checksum.clone());
            }
            None => lacking.push(record.pillar_id.clone()),
        }
    }

    let resolution = match checksums.values().next().cloned() {
        None => ChecksumResolution::Unresolvable,
        Some(first) if checksums.values().all(|c| *c == first) => ChecksumResolution::Agreed {
            checksum: first,
            pillars: checksums.into_keys().collect(),
        },
        Some(_) => ChecksumResolution::Disagreed { checksums },
    };
    ChecksumEvaluation { resolution, lacking }
}

/// The single pillar disagreeing with all others, if there is exactly one.
///
/// Needs at least three pillars; with two there is no telling which is odd.
pub fn odd_one_out(checksums: &BTreeMap<PillarId, Checksum>) -> Option<&PillarId> {
    if checksums.len() < 3 {
        return None;
    }
    let mut tally: BTreeMap<&Checksum, Vec<&PillarId>> = BTreeMap::new();
    for (pillar, checksum) in checksums {
        tally.entry(checksum).or_default().push(pillar);
    }
    if tally.len() != 2 {
        return None;
    }
    tally
        .into_values()
        .find(|pillars| pillars.len() == 1)
        .and_then(|pillars| pillars.into_iter().next())
}
