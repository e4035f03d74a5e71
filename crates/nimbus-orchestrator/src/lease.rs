//! Stack lease (spec.md §3, §4.6 step 1): mutual-exclusion token that
//! serializes mutations on a stack. `stacks cancel` forcibly clears it.

use chrono::Utc;
use nimbus_types::stack::Lease;

use crate::error::LeaseError;
use crate::state::StateBackend;

/// Acquires the lease for `stack_key`, failing fast with `LeaseError::Locked`
/// if another holder already has it (spec.md §4.6 step 1 "Fail fast with
/// StackLocked if held elsewhere").
pub fn acquire(backend: &dyn StateBackend, stack_key: &str, holder: &str) -> Result<Lease, LeaseError> {
    if let Some(existing) = backend
        .read_lease(stack_key)
        .map_err(|e| LeaseError::NotHolder(stack_key.to_string(), e.to_string()))?
    {
        if existing.holder_id != holder {
            return Err(LeaseError::Locked(stack_key.to_string(), existing.holder_id.clone(), existing.acquired_at.to_rfc3339()));
        }
        return Ok(existing);
    }
    let lease = Lease { holder_id: holder.to_string(), acquired_at: Utc::now() };
    backend
        .write_lease(stack_key, &lease)
        .map_err(|e| LeaseError::NotHolder(stack_key.to_string(), e.to_string()))?;
    Ok(lease)
}

pub fn release(backend: &dyn StateBackend, stack_key: &str, holder: &str) -> Result<(), LeaseError> {
    let existing = backend
        .read_lease(stack_key)
        .map_err(|e| LeaseError::NotHolder(stack_key.to_string(), e.to_string()))?;
    match existing {
        Some(lease) if lease.holder_id == holder => {
            backend
                .clear_lease(stack_key)
                .map_err(|e| LeaseError::NotHolder(stack_key.to_string(), e.to_string()))?;
            Ok(())
        }
        Some(lease) => Err(LeaseError::NotHolder(stack_key.to_string(), lease.holder_id)),
        None => Ok(()),
    }
}

/// `stacks cancel`: forcibly clears the lease regardless of holder (spec.md
/// §4.6 step 1 "Cancellation forcibly clears the lease").
pub fn force_cancel(backend: &dyn StateBackend, stack_key: &str) -> Result<(), LeaseError> {
    backend
        .clear_lease(stack_key)
        .map_err(|e| LeaseError::NotHolder(stack_key.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStateBackend;

    #[test]
    fn second_acquire_by_different_holder_fails() {
        let backend = InMemoryStateBackend::new();
        acquire(&backend, "stack-a", "op1").unwrap();
        let err = acquire(&backend, "stack-a", "op2").unwrap_err();
        assert!(matches!(err, LeaseError::Locked(_, holder, _) if holder == "op1"));
    }

    #[test]
    fn release_then_reacquire_succeeds() {
        let backend = InMemoryStateBackend::new();
        acquire(&backend, "stack-a", "op1").unwrap();
        release(&backend, "stack-a", "op1").unwrap();
        acquire(&backend, "stack-a", "op2").unwrap();
    }

    #[test]
    fn force_cancel_clears_regardless_of_holder() {
        let backend = InMemoryStateBackend::new();
        acquire(&backend, "stack-a", "op1").unwrap();
        force_cancel(&backend, "stack-a").unwrap();
        acquire(&backend, "stack-a", "op2").unwrap();
    }
}
