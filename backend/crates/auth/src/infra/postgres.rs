//! PostgreSQL Repository Implementations

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use kernel::id::{PrincipalId, RoleId, SessionId};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::domain::entity::{
    abuse::{LoginFailureRecord, SignupAttemptRecord, SignupLimits},
    access::{LastRecordResource, PermissionAuditEntry},
    mfa_challenge::MfaChallenge,
    password_policy::{PasswordHistoryEntry, PasswordPolicy},
    principal::{Principal, PrincipalRoles, RoleRef},
    session::{Session, SessionActivity, SweepOutcome},
    trusted_device::TrustedDevice,
};
use crate::domain::patch::{PatchValue, PrincipalPatch};
use crate::domain::repository::{
    AbuseLogRepository, AccessRepository, MfaChallengeRepository, PasswordPolicyRepository,
    PrincipalRepository, SessionRepository,
};
use crate::domain::value_object::{
    email::Email, mfa_code::MfaCodeType, password::PasswordHash, principal_kind::PrincipalKind,
    principal_status::PrincipalStatus,
};
use crate::error::{AuthError, AuthResult};

const SETTING_SIGNUP_PER_IP: &str = "signup_per_ip_daily";
const SETTING_SIGNUP_GLOBAL: &str = "signup_global_daily";

/// PostgreSQL-backed auth repository
#[derive(Clone)]
pub struct PgAuthRepository {
    pool: PgPool,
}

impl PgAuthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn employee_roles(&self, principal_id: Uuid) -> AuthResult<Vec<RoleRef>> {
        let rows = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT r.role_id, r.name
            FROM principal_roles pr
            JOIN roles r ON r.role_id = pr.role_id
            WHERE pr.principal_id = $1 AND r.is_active
            ORDER BY r.name
            "#,
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name)| RoleRef {
                id: RoleId::from_uuid(id),
                name,
            })
            .collect())
    }

    async fn hydrate(&self, row: Option<PrincipalRow>) -> AuthResult<Option<Principal>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let kind = PrincipalKind::from_code(&row.kind)
            .ok_or_else(|| AuthError::Internal(format!("Invalid principal kind: {}", row.kind)))?;
        let roles = match kind {
            PrincipalKind::Employee => {
                PrincipalRoles::Employee(self.employee_roles(row.principal_id).await?)
            }
            PrincipalKind::Client => {
                PrincipalRoles::Client(row.client_role.clone().unwrap_or_default())
            }
        };
        row.into_principal(kind, roles).map(Some)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == "23505")
}

fn count(n: i64) -> u64 {
    n.max(0) as u64
}

const PRINCIPAL_COLUMNS: &str = r#"
    principal_id, kind, email, password_hash, email_verified, status, client_role,
    first_name, last_name, phone, password_changed_at, password_expires_at,
    force_password_change, last_login_at, created_at, updated_at
"#;

const SESSION_COLUMNS: &str = r#"
    session_id, principal_id, email, token_digest, user_agent, ip_address,
    created_at, last_activity, expires_at, is_active
"#;

const CHALLENGE_COLUMNS: &str = r#"
    challenge_id, principal_id, email, code_digest, code_type, created_at,
    expires_at, used_at, delivery_phone, failed_attempts
"#;

// ============================================================================
// Principal Repository Implementation
// ============================================================================

impl PrincipalRepository for PgAuthRepository {
    async fn insert_principal(&self, principal: &Principal) -> AuthResult<()> {
        let mut tx = self.pool.begin().await?;

        let client_role = match &principal.roles {
            PrincipalRoles::Client(role) => Some(role.as_str()),
            PrincipalRoles::Employee(_) => None,
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO principals (
                principal_id,
                kind,
                email,
                password_hash,
                email_verified,
                status,
                client_role,
                first_name,
                last_name,
                phone,
                password_changed_at,
                password_expires_at,
                force_password_change,
                last_login_at,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(principal.id.as_uuid())
        .bind(principal.kind.code())
        .bind(principal.email.as_str())
        .bind(principal.password_hash.as_phc_string())
        .bind(principal.email_verified)
        .bind(principal.status.id())
        .bind(client_role)
        .bind(principal.first_name.as_deref())
        .bind(principal.last_name.as_deref())
        .bind(principal.phone.as_deref())
        .bind(principal.password_changed_at)
        .bind(principal.password_expires_at)
        .bind(principal.force_password_change)
        .bind(principal.last_login_at)
        .bind(principal.created_at)
        .bind(principal.updated_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(AuthError::EmailTaken),
            Err(e) => return Err(e.into()),
        }

        if let PrincipalRoles::Employee(roles) = &principal.roles {
            for role in roles {
                sqlx::query("INSERT INTO principal_roles (principal_id, role_id) VALUES ($1, $2)")
                    .bind(principal.id.as_uuid())
                    .bind(role.id.as_uuid())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_principal(&self, id: &PrincipalId) -> AuthResult<Option<Principal>> {
        let row = sqlx::query_as::<_, PrincipalRow>(&format!(
            "SELECT {} FROM principals WHERE principal_id = $1 AND deleted_at IS NULL",
            PRINCIPAL_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn find_principal_by_email(
        &self,
        kind: PrincipalKind,
        email: &Email,
    ) -> AuthResult<Option<Principal>> {
        let row = sqlx::query_as::<_, PrincipalRow>(&format!(
            "SELECT {} FROM principals WHERE kind = $1 AND email = $2 AND deleted_at IS NULL",
            PRINCIPAL_COLUMNS
        ))
        .bind(kind.code())
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn update_principal(&self, id: &PrincipalId, patch: &PrincipalPatch) -> AuthResult<bool> {
        if patch.is_empty() {
            return Ok(self.find_principal(id).await?.is_some());
        }

        // Column names come from the closed allow-list; every value is bound
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE principals SET ");
        let mut set = qb.separated(", ");
        for (field, value) in patch.entries() {
            set.push(field.column());
            set.push_unseparated(" = ");
            match value {
                PatchValue::Text(text) => set.push_bind_unseparated(text.clone()),
                PatchValue::Bool(flag) => set.push_bind_unseparated(*flag),
                PatchValue::Timestamp(at) => set.push_bind_unseparated(*at),
                PatchValue::SmallInt(n) => set.push_bind_unseparated(*n),
            };
        }
        set.push("updated_at = NOW()");
        qb.push(" WHERE principal_id = ");
        qb.push_bind(*id.as_uuid());
        qb.push(" AND deleted_at IS NULL");

        let updated = qb.build().execute(&self.pool).await?.rows_affected();
        Ok(updated > 0)
    }
}

// ============================================================================
// Session Repository Implementation
// ============================================================================

impl SessionRepository for PgAuthRepository {
    async fn insert_session(&self, session: &Session) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id,
                principal_id,
                email,
                token_digest,
                user_agent,
                ip_address,
                created_at,
                last_activity,
                expires_at,
                is_active
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.principal_id.as_uuid())
        .bind(session.email.as_str())
        .bind(&session.token_digest)
        .bind(session.user_agent.as_deref())
        .bind(session.ip_address.as_deref())
        .bind(session.created_at)
        .bind(session.last_activity)
        .bind(session.expires_at)
        .bind(session.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_live_sessions(
        &self,
        principal_id: &PrincipalId,
        now: DateTime<Utc>,
    ) -> AuthResult<u64> {
        let live: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sessions
            WHERE principal_id = $1 AND is_active AND expires_at > $2
            "#,
        )
        .bind(principal_id.as_uuid())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(count(live))
    }

    async fn evict_oldest_session(
        &self,
        principal_id: &PrincipalId,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<SessionId>> {
        let evicted: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE sessions SET is_active = FALSE
            WHERE session_id = (
                SELECT session_id FROM sessions
                WHERE principal_id = $1 AND is_active AND expires_at > $2
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING session_id
            "#,
        )
        .bind(principal_id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(evicted.map(SessionId::from_uuid))
    }

    async fn touch_session(
        &self,
        token_digest: &[u8],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE sessions SET last_activity = $2, expires_at = $3
            WHERE token_digest = $1 AND is_active AND expires_at > $2
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(token_digest)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SessionRow::into_session))
    }

    async fn end_session(&self, token_digest: &[u8]) -> AuthResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE sessions SET is_active = FALSE
            WHERE token_digest = $1 AND is_active
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(token_digest)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SessionRow::into_session))
    }

    async fn end_all_sessions(
        &self,
        principal_id: &PrincipalId,
        except: Option<&SessionId>,
    ) -> AuthResult<u64> {
        let ended = sqlx::query(
            r#"
            UPDATE sessions SET is_active = FALSE
            WHERE principal_id = $1
              AND is_active
              AND ($2::uuid IS NULL OR session_id <> $2)
            "#,
        )
        .bind(principal_id.as_uuid())
        .bind(except.map(|id| *id.as_uuid()))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(ended)
    }

    async fn session_activity(
        &self,
        principal_ids: &[PrincipalId],
        now: DateTime<Utc>,
    ) -> AuthResult<HashMap<PrincipalId, SessionActivity>> {
        let ids: Vec<Uuid> = principal_ids.iter().map(|id| *id.as_uuid()).collect();

        let rows = sqlx::query_as::<_, (Uuid, i64, Option<DateTime<Utc>>)>(
            r#"
            SELECT
                principal_id,
                COUNT(*) FILTER (WHERE is_active AND expires_at > $2),
                MAX(last_activity)
            FROM sessions
            WHERE principal_id = ANY($1)
            GROUP BY principal_id
            "#,
        )
        .bind(&ids)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, active, last_activity)| {
                (
                    PrincipalId::from_uuid(id),
                    SessionActivity {
                        active_sessions: u32::try_from(active.max(0)).unwrap_or(u32::MAX),
                        last_activity,
                    },
                )
            })
            .collect())
    }

    async fn sweep_sessions(
        &self,
        now: DateTime<Utc>,
        purge_before: DateTime<Utc>,
    ) -> AuthResult<SweepOutcome> {
        let mut tx = self.pool.begin().await?;

        let deactivated = sqlx::query(
            "UPDATE sessions SET is_active = FALSE WHERE is_active AND expires_at <= $1",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let purged = sqlx::query("DELETE FROM sessions WHERE NOT is_active AND last_activity < $1")
            .bind(purge_before)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(SweepOutcome {
            deactivated,
            purged,
        })
    }
}

// ============================================================================
// MFA Challenge Repository Implementation
// ============================================================================

impl MfaChallengeRepository for PgAuthRepository {
    async fn replace_challenge(&self, challenge: &MfaChallenge) -> AuthResult<u64> {
        let mut tx = self.pool.begin().await?;

        let invalidated = sqlx::query(
            r#"
            DELETE FROM mfa_challenges
            WHERE principal_id = $1 AND code_type = $2 AND used_at IS NULL
            "#,
        )
        .bind(challenge.principal_id.as_uuid())
        .bind(challenge.code_type.code())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            INSERT INTO mfa_challenges (
                challenge_id,
                principal_id,
                email,
                code_digest,
                code_type,
                created_at,
                expires_at,
                used_at,
                delivery_phone,
                failed_attempts
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(challenge.id.as_uuid())
        .bind(challenge.principal_id.as_uuid())
        .bind(challenge.email.as_str())
        .bind(&challenge.code_digest)
        .bind(challenge.code_type.code())
        .bind(challenge.created_at)
        .bind(challenge.expires_at)
        .bind(challenge.used_at)
        .bind(challenge.delivery_phone.as_deref())
        .bind(challenge.failed_attempts as i32)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(invalidated)
    }

    async fn find_challenge(
        &self,
        principal_id: &PrincipalId,
        code_type: MfaCodeType,
        code_digest: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<MfaChallenge>> {
        let row = sqlx::query_as::<_, ChallengeRow>(&format!(
            r#"
            SELECT {}
            FROM mfa_challenges
            WHERE principal_id = $1
              AND code_type = $2
              AND code_digest = $3
              AND used_at IS NULL
              AND expires_at > $4
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            CHALLENGE_COLUMNS
        ))
        .bind(principal_id.as_uuid())
        .bind(code_type.code())
        .bind(code_digest)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChallengeRow::into_challenge).transpose()
    }

    async fn consume_challenge(
        &self,
        principal_id: &PrincipalId,
        code_type: MfaCodeType,
        code_digest: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<MfaChallenge>> {
        let row = sqlx::query_as::<_, ChallengeRow>(&format!(
            r#"
            UPDATE mfa_challenges SET used_at = $4
            WHERE challenge_id = (
                SELECT challenge_id FROM mfa_challenges
                WHERE principal_id = $1
                  AND code_type = $2
                  AND code_digest = $3
                  AND used_at IS NULL
                  AND expires_at > $4
                ORDER BY created_at DESC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND used_at IS NULL
            RETURNING {}
            "#,
            CHALLENGE_COLUMNS
        ))
        .bind(principal_id.as_uuid())
        .bind(code_type.code())
        .bind(code_digest)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChallengeRow::into_challenge).transpose()
    }

    async fn record_challenge_miss(
        &self,
        principal_id: &PrincipalId,
        code_type: MfaCodeType,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> AuthResult<bool> {
        let burned: Vec<bool> = sqlx::query_scalar(
            r#"
            UPDATE mfa_challenges
            SET failed_attempts = failed_attempts + 1,
                used_at = CASE WHEN failed_attempts + 1 >= $4 THEN $3 ELSE used_at END
            WHERE principal_id = $1
              AND code_type = $2
              AND used_at IS NULL
              AND expires_at > $3
            RETURNING used_at IS NOT NULL
            "#,
        )
        .bind(principal_id.as_uuid())
        .bind(code_type.code())
        .bind(now)
        .bind(max_attempts as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(burned.into_iter().any(|b| b))
    }

    async fn find_trusted_device(
        &self,
        principal_id: &PrincipalId,
        kind: PrincipalKind,
        fingerprint_digest: &str,
    ) -> AuthResult<Option<TrustedDevice>> {
        let row = sqlx::query_as::<_, (DateTime<Utc>, Option<DateTime<Utc>>)>(
            r#"
            SELECT trusted_at, expires_at
            FROM trusted_devices
            WHERE principal_id = $1 AND principal_kind = $2 AND fingerprint_digest = $3
            "#,
        )
        .bind(principal_id.as_uuid())
        .bind(kind.code())
        .bind(fingerprint_digest)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(trusted_at, expires_at)| TrustedDevice {
            principal_id: *principal_id,
            principal_kind: kind,
            fingerprint_digest: fingerprint_digest.to_string(),
            trusted_at,
            expires_at,
        }))
    }

    async fn record_sms_delivery(&self, phone: &str, at: DateTime<Utc>) -> AuthResult<()> {
        sqlx::query("INSERT INTO sms_deliveries (phone, sent_at) VALUES ($1, $2)")
            .bind(phone)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_sms_deliveries(&self, phone: &str, since: DateTime<Utc>) -> AuthResult<u64> {
        let sent: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sms_deliveries WHERE phone = $1 AND sent_at > $2")
                .bind(phone)
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(count(sent))
    }
}

// ============================================================================
// Access Repository Implementation
// ============================================================================

impl AccessRepository for PgAuthRepository {
    async fn find_granting_role(
        &self,
        role_names: &[String],
        key: &str,
    ) -> AuthResult<Option<String>> {
        let role = sqlx::query_scalar(
            r#"
            SELECT r.name
            FROM role_permissions rp
            JOIN roles r ON r.role_id = rp.role_id
            JOIN permissions p ON p.permission_id = rp.permission_id
            WHERE r.name = ANY($1)
              AND r.is_active
              AND p.key = $2
              AND p.is_active
              AND rp.is_granted
            ORDER BY r.name
            LIMIT 1
            "#,
        )
        .bind(role_names)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(role)
    }

    async fn granted_permissions(&self, role_names: &[String]) -> AuthResult<Vec<String>> {
        let keys = sqlx::query_scalar(
            r#"
            SELECT DISTINCT p.key
            FROM role_permissions rp
            JOIN roles r ON r.role_id = rp.role_id
            JOIN permissions p ON p.permission_id = rp.permission_id
            WHERE r.name = ANY($1) AND r.is_active AND p.is_active AND rp.is_granted
            ORDER BY p.key
            "#,
        )
        .bind(role_names)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn permission_catalog(&self) -> AuthResult<Vec<String>> {
        let keys = sqlx::query_scalar("SELECT key FROM permissions WHERE is_active ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }

    async fn append_audit(&self, entry: &PermissionAuditEntry) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT INTO permission_audit_log (
                audit_id,
                principal_id,
                permission_key,
                result,
                role_used,
                details,
                resource_type,
                resource_id,
                ip_address,
                user_agent,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.principal_id.as_uuid())
        .bind(&entry.permission_key)
        .bind(entry.result.code())
        .bind(entry.role_used.as_deref())
        .bind(entry.details.as_deref())
        .bind(entry.resource_type.as_deref())
        .bind(entry.resource_id.as_deref())
        .bind(entry.ip_address.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_active_records(
        &self,
        resource: LastRecordResource,
        scope_id: &Uuid,
    ) -> AuthResult<u64> {
        // One fixed statement per resource type
        let sql = match resource {
            LastRecordResource::ServiceLocation => {
                r#"
                SELECT COUNT(*) FROM service_locations
                WHERE business_id = $1 AND is_active AND deleted_at IS NULL
                "#
            }
            LastRecordResource::Client => {
                r#"
                SELECT COUNT(*) FROM business_clients
                WHERE business_id = $1 AND is_active AND deleted_at IS NULL
                "#
            }
        };

        let active: i64 = sqlx::query_scalar(sql)
            .bind(scope_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count(active))
    }
}

// ============================================================================
// Password Policy Repository Implementation
// ============================================================================

impl PasswordPolicyRepository for PgAuthRepository {
    async fn active_policy(&self, kind: PrincipalKind) -> AuthResult<Option<PasswordPolicy>> {
        let row = sqlx::query_as::<_, PolicyRow>(
            r#"
            SELECT
                min_length,
                max_length,
                require_uppercase,
                require_lowercase,
                require_numbers,
                require_special,
                special_chars,
                prevent_common_passwords,
                prevent_identity_in_password,
                history_count,
                expiration_days
            FROM password_policies
            WHERE principal_kind = $1 AND is_active
            LIMIT 1
            "#,
        )
        .bind(kind.code())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_policy(kind)))
    }

    async fn append_password_history(
        &self,
        entry: &PasswordHistoryEntry,
        keep: u32,
    ) -> AuthResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO password_history (principal_id, password_hash, created_at) VALUES ($1, $2, $3)",
        )
        .bind(entry.principal_id.as_uuid())
        .bind(entry.password_hash.as_phc_string())
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM password_history
            WHERE principal_id = $1
              AND history_id NOT IN (
                SELECT history_id FROM password_history
                WHERE principal_id = $1
                ORDER BY created_at DESC, history_id DESC
                LIMIT $2
              )
            "#,
        )
        .bind(entry.principal_id.as_uuid())
        .bind(i64::from(keep))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn recent_password_hashes(
        &self,
        principal_id: &PrincipalId,
        limit: u32,
    ) -> AuthResult<Vec<PasswordHash>> {
        let hashes: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT password_hash FROM password_history
            WHERE principal_id = $1
            ORDER BY created_at DESC, history_id DESC
            LIMIT $2
            "#,
        )
        .bind(principal_id.as_uuid())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        hashes.into_iter().map(PasswordHash::from_phc_string).collect()
    }
}

// ============================================================================
// Abuse Log Repository Implementation
// ============================================================================

impl AbuseLogRepository for PgAuthRepository {
    async fn record_login_failure(&self, record: &LoginFailureRecord) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT INTO login_attempts (ip_address, identity, principal_kind, reason, attempted_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.ip_address)
        .bind(&record.identity)
        .bind(record.principal_kind.code())
        .bind(record.reason)
        .bind(record.attempted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_login_failures_from_ip(&self, ip: &str, since: DateTime<Utc>) -> AuthResult<u64> {
        let failures: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM login_attempts WHERE ip_address = $1 AND attempted_at > $2",
        )
        .bind(ip)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count(failures))
    }

    async fn record_signup_attempt(&self, record: &SignupAttemptRecord) -> AuthResult<()> {
        sqlx::query("INSERT INTO signup_attempts (ip_address, day, attempted_at) VALUES ($1, $2, $3)")
            .bind(&record.ip_address)
            .bind(record.day)
            .bind(record.attempted_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_signup_attempts(&self, ip: &str, day: NaiveDate) -> AuthResult<u64> {
        let attempts: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM signup_attempts WHERE ip_address = $1 AND day = $2")
                .bind(ip)
                .bind(day)
                .fetch_one(&self.pool)
                .await?;
        Ok(count(attempts))
    }

    async fn signup_limits(&self) -> AuthResult<Option<SignupLimits>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT setting_key, int_value FROM security_settings WHERE setting_key = ANY($1)",
        )
        .bind([SETTING_SIGNUP_PER_IP, SETTING_SIGNUP_GLOBAL].as_slice())
        .fetch_all(&self.pool)
        .await?;

        let value = |key: &str| {
            rows.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| count(*v))
        };
        match (value(SETTING_SIGNUP_PER_IP), value(SETTING_SIGNUP_GLOBAL)) {
            (Some(per_ip_daily), Some(global_daily)) => Ok(Some(SignupLimits {
                per_ip_daily,
                global_daily,
            })),
            _ => Ok(None),
        }
    }
}

// ============================================================================
// Row Types for sqlx mapping
// ============================================================================

#[derive(sqlx::FromRow)]
struct PrincipalRow {
    principal_id: Uuid,
    kind: String,
    email: String,
    password_hash: String,
    email_verified: bool,
    status: i16,
    client_role: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    password_changed_at: Option<DateTime<Utc>>,
    password_expires_at: Option<DateTime<Utc>>,
    force_password_change: bool,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PrincipalRow {
    fn into_principal(self, kind: PrincipalKind, roles: PrincipalRoles) -> AuthResult<Principal> {
        let status = PrincipalStatus::from_id(self.status)
            .ok_or_else(|| AuthError::Internal(format!("Invalid principal status: {}", self.status)))?;

        Ok(Principal {
            id: PrincipalId::from_uuid(self.principal_id),
            kind,
            email: Email::from_db(self.email),
            password_hash: PasswordHash::from_phc_string(self.password_hash)?,
            email_verified: self.email_verified,
            status,
            roles,
            first_name: self.first_name,
            last_name: self.last_name,
            phone: self.phone,
            password_changed_at: self.password_changed_at,
            password_expires_at: self.password_expires_at,
            force_password_change: self.force_password_change,
            last_login_at: self.last_login_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: Uuid,
    principal_id: Uuid,
    email: String,
    token_digest: Vec<u8>,
    user_agent: Option<String>,
    ip_address: Option<String>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_active: bool,
}

impl SessionRow {
    fn into_session(self) -> Session {
        Session {
            id: SessionId::from_uuid(self.session_id),
            principal_id: PrincipalId::from_uuid(self.principal_id),
            email: Email::from_db(self.email),
            token_digest: self.token_digest,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            created_at: self.created_at,
            last_activity: self.last_activity,
            expires_at: self.expires_at,
            is_active: self.is_active,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ChallengeRow {
    challenge_id: Uuid,
    principal_id: Uuid,
    email: String,
    code_digest: String,
    code_type: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    delivery_phone: Option<String>,
    failed_attempts: i32,
}

impl ChallengeRow {
    fn into_challenge(self) -> AuthResult<MfaChallenge> {
        let code_type = MfaCodeType::from_code(&self.code_type)
            .ok_or_else(|| AuthError::Internal(format!("Invalid code type: {}", self.code_type)))?;

        Ok(MfaChallenge {
            id: self.challenge_id.into(),
            principal_id: PrincipalId::from_uuid(self.principal_id),
            email: Email::from_db(self.email),
            code_digest: self.code_digest,
            code_type,
            created_at: self.created_at,
            expires_at: self.expires_at,
            used_at: self.used_at,
            delivery_phone: self.delivery_phone,
            failed_attempts: self.failed_attempts.max(0) as u32,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    min_length: i32,
    max_length: i32,
    require_uppercase: bool,
    require_lowercase: bool,
    require_numbers: bool,
    require_special: bool,
    special_chars: String,
    prevent_common_passwords: bool,
    prevent_identity_in_password: bool,
    history_count: i32,
    expiration_days: i32,
}

impl PolicyRow {
    fn into_policy(self, kind: PrincipalKind) -> PasswordPolicy {
        let non_negative = |n: i32| n.max(0) as u32;
        PasswordPolicy {
            principal_kind: kind,
            min_length: non_negative(self.min_length),
            max_length: non_negative(self.max_length),
            require_uppercase: self.require_uppercase,
            require_lowercase: self.require_lowercase,
            require_numbers: self.require_numbers,
            require_special: self.require_special,
            special_chars: self.special_chars,
            prevent_common_passwords: self.prevent_common_passwords,
            prevent_identity_in_password: self.prevent_identity_in_password,
            history_count: non_negative(self.history_count),
            expiration_days: non_negative(self.expiration_days),
        }
    }
}
