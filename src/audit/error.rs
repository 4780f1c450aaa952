use crate::store::GatewayError;

#[derive(Debug)]
pub enum AuditError {
    Gateway(GatewayError),
    /// Discovery found no ledger key mentioning the category.
    NoLedgerKeys(String),
}

impl From<GatewayError> for AuditError {
    fn from(e: GatewayError) -> Self {
        AuditError::Gateway(e)
    }
}

impl std::fmt::Display for AuditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditError::Gateway(e) => write!(f, "{e}"),
            AuditError::NoLedgerKeys(category) => {
                write!(f, "no ledger keys found for {category}")
            }
        }
    }
}

impl std::error::Error for AuditError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuditError::Gateway(e) => Some(e),
            AuditError::NoLedgerKeys(_) => None,
        }
    }
}
