// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Audit trail for authentication outcomes.
//!
//! Every sign-in attempt – OAuth2 callback, htpasswd form, basic
//! credentials – lands here with the subject, the remote address and a
//! human-readable reason.  Secrets never do.

use crate::logging::is_structured_logging;

/// Record a successful authentication.
pub fn auth_success(subject: &str, remote_addr: Option<&str>, reason: &str) {
    emit("AuthSuccess", subject, remote_addr, reason);
}

/// Record a failed or rejected authentication.
pub fn auth_failure(subject: &str, remote_addr: Option<&str>, reason: &str) {
    emit("AuthFailure", subject, remote_addr, reason);
}

fn emit(outcome: &'static str, subject: &str, remote_addr: Option<&str>, reason: &str) {
    let subject = if subject.is_empty() { "-" } else { subject };
    let remote = remote_addr.unwrap_or("-");

    if is_structured_logging() {
        slog_scope::info!("{}", reason;
            "audit" => outcome,
            "subject" => subject.to_string(),
            "remote_addr" => remote.to_string(),
        );
    } else {
        log::info!("{outcome} [{subject}] [{remote}] {reason}");
    }
}
