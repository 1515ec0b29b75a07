//! Classification of AWS SDK errors
//!
//! Uses the `.code()` and `.message()` metadata every SDK operation error
//! exposes, instead of string matching on the Debug format.

use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use converge_common::{AwsError, classify_aws_error};

/// Classify an SDK error from any service (IAM and S3 share `SdkError`).
///
/// Errors without service metadata (timeouts, dispatch failures) fall
/// through to [`AwsError::Sdk`] with the full error context as message.
pub fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> AwsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    classify_aws_error(code.as_deref(), Some(&message))
}

/// Map a request builder failure (missing required field)
pub fn invalid_request(err: impl std::fmt::Display) -> AwsError {
    AwsError::InvalidRequest(err.to_string())
}

/// Run a fallible operation, mapping "not found" into `Ok(None)`.
pub async fn ignore_not_found<T, F>(fut: F) -> Result<Option<T>, AwsError>
where
    F: std::future::Future<Output = Result<T, AwsError>>,
{
    match fut.await {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
