pub mod booking;
pub mod catalog;
pub mod loyalty;

pub use booking::{Booking, BookingAction, BookingStatus};
pub use catalog::Service;
pub use loyalty::{
    LoyaltyAccount, LoyaltyProgram, LoyaltyTransaction, ProgramRules, ProgramType, RewardKind,
    RewardResult, RewardType, TransactionType,
};
