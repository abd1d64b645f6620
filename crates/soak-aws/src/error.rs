use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use soak_core::SoakError;

/// Error codes EC2 returns for bad or insufficient credentials.
const AUTH_CODES: &[&str] = &[
    "AuthFailure",
    "UnauthorizedOperation",
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "OptInRequired",
];

pub(crate) const KEY_PAIR_DUPLICATE: &str = "InvalidKeyPair.Duplicate";
pub(crate) const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";

pub(crate) fn is_auth_code(code: &str) -> bool {
    AUTH_CODES.contains(&code)
}

/// Service error code of an SDK error, if the request reached EC2.
pub(crate) fn error_code<E, R>(err: &SdkError<E, R>) -> Option<&str>
where
    E: ProvideErrorMetadata,
{
    err.as_service_error().and_then(|e| e.code())
}

/// Map an SDK error onto the harness error taxonomy.
pub fn classify_sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> SoakError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = format!("{}: {}", operation, DisplayErrorContext(&err));
    if error_code(&err).is_some_and(is_auth_code) {
        return SoakError::Auth(detail);
    }
    match &err {
        SdkError::TimeoutError(_) => SoakError::Timeout(detail),
        _ => SoakError::Provision(detail),
    }
}
