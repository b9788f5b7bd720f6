use crate::error::AppError;

/// Hash on the blocking pool; bcrypt is deliberately slow.
pub async fn hash_password(password: String, cost: u32) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
}

/// False for a wrong password and for a hash bcrypt cannot parse.
pub async fn verify_password(password: String, hash: String) -> Result<bool, AppError> {
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    match verified {
        Ok(ok) => Ok(ok),
        Err(e) => {
            tracing::warn!("Stored password hash is unusable: {}", e);
            Ok(false)
        }
    }
}
