pub mod price_record;
pub mod symbol;

pub use price_record::{FundingInfo, PriceRecord};
pub use symbol::{InstrumentSymbol, SymbolRules};
