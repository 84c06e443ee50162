//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod allocation;
pub mod category_route;
pub mod envelope;
pub mod envelope_transfer;
pub mod ledger_transaction;
pub mod overflow_reserve;
pub mod overflow_transaction;
pub mod pay_cycle;
pub mod pay_cycle_instance;
pub mod quick_add_shortcut;
pub mod recurring_rule;

// Re-export specific types to avoid conflicts
pub use allocation::{Entity as Allocation, Model as AllocationModel};
pub use category_route::{Entity as CategoryRoute, Model as CategoryRouteModel};
pub use envelope::{Entity as Envelope, Model as EnvelopeModel, RolloverPolicy};
pub use envelope_transfer::{
    Entity as EnvelopeTransfer, Model as EnvelopeTransferModel, TransferReason,
};
pub use ledger_transaction::{
    Entity as LedgerTransaction, Model as LedgerTransactionModel, TransactionSource,
    TransactionType,
};
pub use overflow_reserve::{Entity as OverflowReserve, Model as OverflowReserveModel};
pub use overflow_transaction::{
    Entity as OverflowTransaction, Model as OverflowTransactionModel, ReserveMovement,
    ReserveSource,
};
pub use pay_cycle::{Entity as PayCycle, Frequency, Model as PayCycleModel};
pub use pay_cycle_instance::{
    Entity as PayCycleInstance, Model as PayCycleInstanceModel, PaydayType,
};
pub use quick_add_shortcut::{Entity as QuickAddShortcut, Model as QuickAddShortcutModel};
pub use recurring_rule::{Entity as RecurringRule, Model as RecurringRuleModel};
