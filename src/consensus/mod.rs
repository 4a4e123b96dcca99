//! Consensus module - cohort rounds, leader selection and the oracle cycle

mod channel;
mod leader;
mod oracle;
mod requests;
mod round;
mod scheduler;
mod udp;

pub use channel::{CohortChannel, LocalChannel, LocalCohort, RoundId, RoundMessage, RoundPhase};
pub use leader::{propose, select_leader, LeaderSelection};
pub use oracle::{
    CohortFigure, ConsensusOracle, CycleReport, LeaderProposal, OracleSettings, Submission,
};
pub use requests::{respond, serve_lines, ContractEntry, UserRequest};
pub use round::{RoundCoordinator, RoundOutcome, RoundState, RoundStatus};
pub use scheduler::{current_cycle, run_schedule};
pub use udp::UdpCohortChannel;
