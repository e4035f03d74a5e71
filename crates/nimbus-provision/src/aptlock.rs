//! Apt-lock / mirror resilience (spec.md §4.4): any apt invocation on a
//! managed node is wrapped in this retry-with-mirror-fallback shape. Shared
//! by cloud-init rendering and the validator/installer remote commands so
//! there's exactly one copy of the wrapper logic.

/// Wraps `apt_command` (e.g. `"install -y curl"`) in a shell fragment that
/// waits up to 5 minutes for the package lock (killing holders after the
/// deadline), retries up to 5 times, and after the third failure rewrites
/// known-problematic vendor mirrors to the distribution's official ones.
pub fn wrap_apt_command(apt_command: &str) -> String {
    format!(
        r#"
nimbus_apt_retry() {{
  local deadline=300 waited=0
  while fuser /var/lib/dpkg/lock-frontend >/dev/null 2>&1; do
    if [ "$waited" -ge "$deadline" ]; then
      systemctl stop unattended-upgrades.service >/dev/null 2>&1 || true
      pkill -f unattended-upgrade >/dev/null 2>&1 || true
      break
    fi
    sleep 5
    waited=$((waited + 5))
  done
  local attempt=1
  until apt-get {cmd}; do
    attempt=$((attempt + 1))
    if [ "$attempt" -eq 4 ]; then
      sed -i 's|http://[a-z.]*\.cloud\.archive\.ubuntu\.com|http://archive.ubuntu.com|g' /etc/apt/sources.list || true
      apt-get update || true
    fi
    if [ "$attempt" -gt 5 ]; then
      return 1
    fi
    sleep $((attempt * 3))
  done
}}
nimbus_apt_retry
"#,
        cmd = apt_command
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_with_retry_and_mirror_fallback() {
        let script = wrap_apt_command("install -y curl");
        assert!(script.contains("install -y curl"));
        assert!(script.contains("archive.ubuntu.com"));
        assert!(script.contains("attempt -gt 5"));
    }
}
