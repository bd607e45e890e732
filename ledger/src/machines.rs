//! # MachineDirectory
//!
//! Maps a machine id to its display name and its tokens-per-credit rate.
//! The reservation service reads it when opening a spend (for the name
//! shown in history) and when settling a claim (for the rate).
//!
//! An unregistered machine is not an error anywhere: it is shown by its
//! raw id and converts at [`DEFAULT_TOKENS_PER_CREDIT`].

use serde::{Deserialize, Serialize};
use sled::Tree;

use crate::config::{DEFAULT_TOKENS_PER_CREDIT, SEED_MACHINE_ID, SEED_MACHINE_NAME};
use crate::error::LedgerResult;
use crate::storage::db::{decode, encode, LedgerDb};
use crate::validation::{validate_amount, validate_id};

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// A registered physical machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    /// Opaque machine identifier, also used in claim signatures.
    pub id: String,
    /// Name shown in the app's history.
    pub name: String,
    /// How many tokens buy one machine credit. Always positive.
    pub tokens_per_credit: u64,
    /// Free-form location, e.g. "Back wall, left".
    pub location: Option<String>,
}

impl Machine {
    /// A machine named after its id with the default conversion rate.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            tokens_per_credit: DEFAULT_TOKENS_PER_CREDIT,
            location: None,
        }
    }

    /// Credits awarded for `tokens`: integer division, but never zero.
    pub fn credits_for(&self, tokens: u64) -> u64 {
        credits_for(tokens, self.tokens_per_credit)
    }
}

/// `max(1, tokens / rate)`, treating a zero rate as the default.
pub fn credits_for(tokens: u64, tokens_per_credit: u64) -> u64 {
    let rate = if tokens_per_credit == 0 {
        DEFAULT_TOKENS_PER_CREDIT
    } else {
        tokens_per_credit
    };
    (tokens / rate).max(1)
}

/// Input to [`MachineDirectory::register`]. Omitted fields take defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineRegistration {
    pub machine_id: String,
    /// Defaults to the machine id.
    pub name: Option<String>,
    /// Defaults to [`DEFAULT_TOKENS_PER_CREDIT`]. Zero is rejected.
    pub tokens_per_credit: Option<u64>,
    /// Kept from the previous registration when omitted.
    pub location: Option<String>,
}

// ---------------------------------------------------------------------------
// MachineDirectory
// ---------------------------------------------------------------------------

/// Registry of machines over the `machines` tree.
#[derive(Debug, Clone)]
pub struct MachineDirectory {
    machines: Tree,
}

impl MachineDirectory {
    pub fn new(db: &LedgerDb) -> Self {
        Self {
            machines: db.machines().clone(),
        }
    }

    /// Inserts or replaces a machine.
    pub fn register(&self, registration: MachineRegistration) -> LedgerResult<Machine> {
        let MachineRegistration {
            machine_id,
            name,
            tokens_per_credit,
            location,
        } = registration;
        validate_id("machine_id", &machine_id)?;
        let tokens_per_credit = tokens_per_credit.unwrap_or(DEFAULT_TOKENS_PER_CREDIT);
        validate_amount("tokens_per_credit", tokens_per_credit)?;

        let location = match location {
            Some(location) => Some(location),
            None => self.get(&machine_id)?.and_then(|m| m.location),
        };
        let machine = Machine {
            name: name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| machine_id.clone()),
            id: machine_id,
            tokens_per_credit,
            location,
        };
        self.machines
            .insert(machine.id.as_bytes(), encode(&machine)?)?;

        tracing::info!(
            machine_id = %machine.id,
            name = %machine.name,
            tokens_per_credit = machine.tokens_per_credit,
            "machine registered"
        );
        Ok(machine)
    }

    /// Looks up a machine.
    pub fn get(&self, machine_id: &str) -> LedgerResult<Option<Machine>> {
        match self.machines.get(machine_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The machine's conversion rate, or the default if unregistered.
    pub fn tokens_per_credit(&self, machine_id: &str) -> LedgerResult<u64> {
        Ok(self
            .get(machine_id)?
            .map(|m| m.tokens_per_credit)
            .unwrap_or(DEFAULT_TOKENS_PER_CREDIT))
    }

    /// The machine's display name, or its raw id if unregistered.
    pub fn display_name(&self, machine_id: &str) -> LedgerResult<String> {
        Ok(self
            .get(machine_id)?
            .map(|m| m.name)
            .unwrap_or_else(|| machine_id.to_string()))
    }

    /// Registers the default machine if it is missing. Returns `true` if
    /// it was inserted.
    pub fn seed_default(&self) -> LedgerResult<bool> {
        let machine = Machine {
            name: SEED_MACHINE_NAME.to_string(),
            ..Machine::new(SEED_MACHINE_ID)
        };
        let inserted = self
            .machines
            .compare_and_swap(
                SEED_MACHINE_ID.as_bytes(),
                None as Option<&[u8]>,
                Some(encode(&machine)?),
            )?
            .is_ok();
        if inserted {
            tracing::info!(machine_id = SEED_MACHINE_ID, "seeded default machine");
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;

    fn directory() -> MachineDirectory {
        MachineDirectory::new(&LedgerDb::open_temporary().expect("temp db"))
    }

    fn registration(id: &str) -> MachineRegistration {
        MachineRegistration {
            machine_id: id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn credits_never_zero() {
        assert_eq!(credits_for(3, 1), 3);
        assert_eq!(credits_for(10, 4), 2);
        assert_eq!(credits_for(1, 5), 1);
        assert_eq!(credits_for(7, 0), 7);
    }

    #[test]
    fn register_with_defaults() {
        let dir = directory();
        let machine = dir.register(registration("M042")).unwrap();
        assert_eq!(machine.name, "M042");
        assert_eq!(machine.tokens_per_credit, 1);
        assert_eq!(dir.get("M042").unwrap(), Some(machine));
    }

    #[test]
    fn register_is_an_upsert() {
        let dir = directory();
        dir.register(MachineRegistration {
            name: Some("Galaga".into()),
            tokens_per_credit: Some(2),
            location: Some("Front".into()),
            ..registration("M002")
        })
        .unwrap();
        let updated = dir
            .register(MachineRegistration {
                name: Some("Ms. Pac-Man".into()),
                tokens_per_credit: Some(4),
                ..registration("M002")
            })
            .unwrap();

        assert_eq!(updated.name, "Ms. Pac-Man");
        assert_eq!(updated.tokens_per_credit, 4);
        assert_eq!(updated.location.as_deref(), Some("Front"));
        assert_eq!(dir.tokens_per_credit("M002").unwrap(), 4);
    }

    #[test]
    fn zero_rate_rejected() {
        let dir = directory();
        let result = dir.register(MachineRegistration {
            tokens_per_credit: Some(0),
            ..registration("M003")
        });
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert!(dir.get("M003").unwrap().is_none());
    }

    #[test]
    fn missing_id_rejected() {
        assert!(matches!(
            directory().register(registration("")),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn unknown_machine_falls_back() {
        let dir = directory();
        assert_eq!(dir.tokens_per_credit("nowhere").unwrap(), 1);
        assert_eq!(dir.display_name("nowhere").unwrap(), "nowhere");
    }

    #[test]
    fn seed_only_inserts_once() {
        let dir = directory();
        assert!(dir.seed_default().unwrap());
        assert_eq!(dir.display_name("M001").unwrap(), "Double Dragon");

        dir.register(MachineRegistration {
            name: Some("Renamed".into()),
            ..registration("M001")
        })
        .unwrap();
        assert!(!dir.seed_default().unwrap());
        assert_eq!(dir.display_name("M001").unwrap(), "Renamed");
    }
}
