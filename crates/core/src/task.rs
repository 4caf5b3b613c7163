use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SealerError;

/// Kind of sealing computation a worker can be asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "seal/v0/addpiece")]
    AddPiece,
    #[serde(rename = "seal/v0/precommit/1")]
    PreCommit1,
    #[serde(rename = "seal/v0/precommit/2")]
    PreCommit2,
    #[serde(rename = "seal/v0/commit/1")]
    Commit1,
    #[serde(rename = "seal/v0/commit/2")]
    Commit2,
    #[serde(rename = "seal/v0/finalize")]
    Finalize,
    #[serde(rename = "seal/v0/fetch")]
    Fetch,
    #[serde(rename = "seal/v0/unseal")]
    Unseal,
    #[serde(rename = "seal/v0/unsealread")]
    ReadUnsealed,
}

impl TaskType {
    pub const ALL: [TaskType; 9] = [
        TaskType::AddPiece,
        TaskType::PreCommit1,
        TaskType::PreCommit2,
        TaskType::Commit1,
        TaskType::Commit2,
        TaskType::Finalize,
        TaskType::Fetch,
        TaskType::Unseal,
        TaskType::ReadUnsealed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::AddPiece => "seal/v0/addpiece",
            TaskType::PreCommit1 => "seal/v0/precommit/1",
            TaskType::PreCommit2 => "seal/v0/precommit/2",
            TaskType::Commit1 => "seal/v0/commit/1",
            TaskType::Commit2 => "seal/v0/commit/2",
            TaskType::Finalize => "seal/v0/finalize",
            TaskType::Fetch => "seal/v0/fetch",
            TaskType::Unseal => "seal/v0/unseal",
            TaskType::ReadUnsealed => "seal/v0/unsealread",
        }
    }

    /// Short human label, e.g. `PC1`.
    pub fn short(&self) -> &'static str {
        match self {
            TaskType::AddPiece => "AP",
            TaskType::PreCommit1 => "PC1",
            TaskType::PreCommit2 => "PC2",
            TaskType::Commit1 => "C1",
            TaskType::Commit2 => "C2",
            TaskType::Finalize => "FIN",
            TaskType::Fetch => "GET",
            TaskType::Unseal => "UNS",
            TaskType::ReadUnsealed => "RD",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = SealerError;

    /// Accepts either the full name (`seal/v0/precommit/1`) or the short label (`PC1`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s || t.short().eq_ignore_ascii_case(s))
            .ok_or_else(|| SealerError::UnknownTaskType(s.to_string()))
    }
}

/// Registered seal proof; determines sector size and therefore resource needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProofType {
    #[serde(rename = "2KiB")]
    StackedDrg2KiB,
    #[serde(rename = "8MiB")]
    StackedDrg8MiB,
    #[serde(rename = "512MiB")]
    StackedDrg512MiB,
    #[serde(rename = "32GiB")]
    StackedDrg32GiB,
    #[serde(rename = "64GiB")]
    StackedDrg64GiB,
}

impl ProofType {
    /// Sector size in bytes.
    pub fn sector_size(&self) -> u64 {
        match self {
            ProofType::StackedDrg2KiB => 2 << 10,
            ProofType::StackedDrg8MiB => 8 << 20,
            ProofType::StackedDrg512MiB => 512 << 20,
            ProofType::StackedDrg32GiB => 32 << 30,
            ProofType::StackedDrg64GiB => 64 << 30,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProofType::StackedDrg2KiB => "2KiB",
            ProofType::StackedDrg8MiB => "8MiB",
            ProofType::StackedDrg512MiB => "512MiB",
            ProofType::StackedDrg32GiB => "32GiB",
            ProofType::StackedDrg64GiB => "64GiB",
        }
    }
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProofType {
    type Err = SealerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2KiB" => Ok(ProofType::StackedDrg2KiB),
            "8MiB" => Ok(ProofType::StackedDrg8MiB),
            "512MiB" => Ok(ProofType::StackedDrg512MiB),
            "32GiB" => Ok(ProofType::StackedDrg32GiB),
            "64GiB" => Ok(ProofType::StackedDrg64GiB),
            other => Err(SealerError::UnsupportedProof(other.to_string())),
        }
    }
}
