//! Business logic services for the Farm Feed Management Platform

pub mod alert;
pub mod audit;
pub mod production;
pub mod purchase;
pub mod raw_material;
pub mod recipe;
pub mod reconcile;
pub mod stock;

pub use alert::StockAlertService;
pub use audit::AuditService;
pub use production::ProductionService;
pub use purchase::PurchaseService;
pub use raw_material::RawMaterialService;
pub use recipe::RecipeService;
pub use reconcile::ReconciliationService;
pub use stock::StockLedgerService;
