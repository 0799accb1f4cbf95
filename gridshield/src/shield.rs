// src/shield.rs
//
// The synthesized shield: a fully labeled grid plus the names of its
// actions and whether synthesis reached a fixed point.

use serde::{Deserialize, Serialize};

use crate::actions::{ActionSet, MAX_ACTIONS};
use crate::error::{Result, ShieldError};
use crate::grid::{CellRef, Grid};

/// Whether the labels are a true fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    /// A full pass changed nothing.
    Converged,
    /// The pass budget ran out first. Labels are only a finite-horizon
    /// guarantee.
    Incomplete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shield {
    grid: Grid,
    action_names: Vec<String>,
    completeness: Completeness,
    passes: u64,
}

impl Shield {
    pub fn new(
        grid: Grid,
        action_names: Vec<String>,
        completeness: Completeness,
        passes: u64,
    ) -> Result<Self> {
        validate_action_names(&action_names)?;
        let all = ActionSet::all(action_names.len());
        if let Some(label) = grid
            .labels()
            .iter()
            .find(|l| !l.allowed().is_subset(all))
        {
            return Err(ShieldError::InvalidActionSpace(format!(
                "cell label {label:?} names actions beyond the {} declared",
                action_names.len()
            )));
        }
        Ok(Self {
            grid,
            action_names,
            completeness,
            passes,
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Give the grid back, e.g. to resume synthesis from these labels.
    pub fn into_grid(self) -> Grid {
        self.grid
    }

    pub fn num_actions(&self) -> usize {
        self.action_names.len()
    }

    pub fn action_names(&self) -> &[String] {
        &self.action_names
    }

    pub fn action_index(&self, name: &str) -> Option<usize> {
        self.action_names.iter().position(|n| n == name)
    }

    pub fn completeness(&self) -> Completeness {
        self.completeness
    }

    pub fn is_converged(&self) -> bool {
        self.completeness == Completeness::Converged
    }

    /// Number of fixed-point passes that produced this shield.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn allowed(&self, cell: CellRef) -> ActionSet {
        self.grid.label_at(cell).allowed()
    }

    /// Allowed actions at a raw state; empty outside the grid.
    pub fn allowed_at(&self, state: &[f64]) -> ActionSet {
        self.allowed(self.grid.cell_of(state))
    }

    pub fn summary(&self) -> ShieldSummary {
        let counts = self.grid.count_labels();
        let mut per_action = vec![0usize; self.num_actions()];
        for label in self.grid.labels() {
            for a in label.allowed() {
                per_action[a] += 1;
            }
        }
        ShieldSummary {
            dimensions: self.grid.dimensions(),
            granularity: self.grid.granularity().to_vec(),
            lower: self.grid.bounds().lower.clone(),
            upper: self.grid.bounds().upper.clone(),
            size: self.grid.size().to_vec(),
            cells: self.grid.len(),
            cells_with_actions: counts.with_actions,
            cells_fully_unsafe: counts.fully_unsafe,
            cells_unclassified: counts.unclassified,
            allowed_per_action: self
                .action_names
                .iter()
                .cloned()
                .zip(per_action)
                .map(|(action, cells)| ActionCount { action, cells })
                .collect(),
            completeness: self.completeness,
            passes: self.passes,
        }
    }
}

/// Number of cells in which one action is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCount {
    pub action: String,
    pub cells: usize,
}

/// JSON-friendly description of a shield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShieldSummary {
    pub dimensions: usize,
    pub granularity: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub size: Vec<usize>,
    pub cells: usize,
    pub cells_with_actions: usize,
    pub cells_fully_unsafe: usize,
    pub cells_unclassified: usize,
    pub allowed_per_action: Vec<ActionCount>,
    pub completeness: Completeness,
    pub passes: u64,
}

pub(crate) fn validate_action_names(names: &[String]) -> Result<()> {
    if names.is_empty() || names.len() > MAX_ACTIONS {
        return Err(ShieldError::InvalidActionSpace(format!(
            "need between 1 and {MAX_ACTIONS} actions, got {}",
            names.len()
        )));
    }
    for (i, name) in names.iter().enumerate() {
        if name.is_empty() || name.len() > u16::MAX as usize {
            return Err(ShieldError::InvalidActionSpace(format!(
                "action {i} has an empty or oversized name"
            )));
        }
        if names[..i].contains(name) {
            return Err(ShieldError::InvalidActionSpace(format!(
                "duplicate action name {name:?}"
            )));
        }
    }
    Ok(())
}
