#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{Duration, Utc};

    use crate::core::auth::{
        AddressChangeEvent, AddressChangeNotifier, AuthError, AuthService, CredentialPolicy,
        JwtConfig, JwtService, MemoryRefreshCredentialStore, RefreshRequest,
    };

    #[derive(Default)]
    struct CountingNotifier {
        calls: AtomicUsize,
    }

    impl AddressChangeNotifier for CountingNotifier {
        fn address_changed(&self, _event: AddressChangeEvent) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        service: AuthService,
        notifier: Arc<CountingNotifier>,
    }

    const SECRET: &str = "core_test_secret";

    fn harness_with(policy: CredentialPolicy) -> Harness {
        let notifier = Arc::new(CountingNotifier::default());
        let service = AuthService::new(
            JwtService::new(JwtConfig::new(SECRET)),
            Arc::new(MemoryRefreshCredentialStore::new()),
            notifier.clone(),
            policy.bcrypt_cost(4),
        )
        .unwrap();
        Harness { service, notifier }
    }

    fn harness() -> Harness {
        harness_with(CredentialPolicy::default())
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn request(access_token: &str, refresh_token: &str) -> RefreshRequest {
        RefreshRequest {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
        }
    }

    #[tokio::test]
    async fn test_issue_then_refresh_keeps_subject() {
        let h = harness();

        for subject in ["u1", "alice@example.com", "550e8400-e29b-41d4-a716-446655440000"] {
            let issued = h.service.issue(subject, ip("10.0.0.1")).await.unwrap();
            let refreshed = h
                .service
                .refresh(
                    request(&issued.access_token, &issued.refresh_token),
                    ip("10.0.0.1"),
                )
                .await
                .unwrap();

            let claims = h
                .service
                .verify_access_token(&refreshed.access_token)
                .unwrap();
            assert_eq!(claims.sub, subject);
        }
    }

    #[tokio::test]
    async fn test_expired_access_token_fails_verification() {
        let h = harness();
        h.service.issue("u1", ip("10.0.0.1")).await.unwrap();

        // Same key ring as the service, token expired a minute ago
        let expired = JwtService::new(JwtConfig::new(SECRET))
            .generate_expired_access_token("u1", ip("10.0.0.1"), Duration::minutes(1))
            .unwrap();

        let result = h.service.verify_access_token(&expired);
        assert!(matches!(result, Err(AuthError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_refresh_with_wrong_credential_unauthorized() {
        let h = harness();
        let issued = h.service.issue("u1", ip("10.0.0.1")).await.unwrap();

        let mut tampered = issued.refresh_token.clone();
        let last = if tampered.ends_with('0') { "1" } else { "0" };
        tampered.replace_range(tampered.len() - 1.., last);

        let result = h
            .service
            .refresh(request(&issued.access_token, &tampered), ip("10.0.0.1"))
            .await;
        assert!(matches!(result, Err(AuthError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_refresh_for_unknown_subject_unauthorized_not_internal() {
        let h = harness();
        let issued = h.service.issue("u1", ip("10.0.0.1")).await.unwrap();

        // A second service with the same key but an empty store
        let other = harness();
        let result = other
            .service
            .refresh(
                request(&issued.access_token, &issued.refresh_token),
                ip("10.0.0.1"),
            )
            .await;

        assert!(matches!(result, Err(AuthError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_second_issue_invalidates_first_credential() {
        let h = harness();

        let first = h.service.issue("u1", ip("10.0.0.1")).await.unwrap();
        let second = h.service.issue("u1", ip("10.0.0.1")).await.unwrap();

        let result = h
            .service
            .refresh(
                request(&first.access_token, &first.refresh_token),
                ip("10.0.0.1"),
            )
            .await;
        assert!(matches!(result, Err(AuthError::Unauthorized)));

        let result = h
            .service
            .refresh(
                request(&second.access_token, &second.refresh_token),
                ip("10.0.0.1"),
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_issue_leaves_exactly_one_valid_credential() {
        let h = harness();

        let (a, b) = tokio::join!(
            h.service.issue("u1", ip("10.0.0.1")),
            h.service.issue("u1", ip("10.0.0.1"))
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let ok_a = h
            .service
            .refresh(request(&a.access_token, &a.refresh_token), ip("10.0.0.1"))
            .await
            .is_ok();
        let ok_b = h
            .service
            .refresh(request(&b.access_token, &b.refresh_token), ip("10.0.0.1"))
            .await
            .is_ok();

        // Last write wins; which one is not specified
        assert!(ok_a ^ ok_b);
    }

    #[tokio::test]
    async fn test_address_change_example() {
        let h = harness();
        let issued = h.service.issue("u1", ip("10.0.0.1")).await.unwrap();

        let same = h
            .service
            .refresh(
                request(&issued.access_token, &issued.refresh_token),
                ip("10.0.0.1"),
            )
            .await;
        assert!(same.is_ok());
        assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 0);

        let moved = h
            .service
            .refresh(
                request(&issued.access_token, &issued.refresh_token),
                ip("10.0.0.9"),
            )
            .await;
        assert!(moved.is_ok());
        assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 1);

        let moved_again = h
            .service
            .refresh(
                request(&issued.access_token, &issued.refresh_token),
                ip("10.0.0.9"),
            )
            .await;
        assert!(moved_again.is_ok());
        assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_verify_round_trip() {
        let h = harness();
        let before = Utc::now().timestamp();

        let issued = h.service.issue("u1", ip("192.168.1.20")).await.unwrap();
        let claims = h.service.verify_access_token(&issued.access_token).unwrap();

        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.ip, "192.168.1.20");
        assert!((claims.exp - (before + 15 * 60)).abs() <= 2);
    }

    #[tokio::test]
    async fn test_rotation_policy_end_to_end() {
        let h = harness_with(CredentialPolicy::default().rotate_on_refresh(true));
        let issued = h.service.issue("u1", ip("10.0.0.1")).await.unwrap();

        let refreshed = h
            .service
            .refresh(
                request(&issued.access_token, &issued.refresh_token),
                ip("10.0.0.1"),
            )
            .await
            .unwrap();
        let rotated = refreshed.refresh_token.clone().unwrap();

        let replay = h
            .service
            .refresh(
                request(&issued.access_token, &issued.refresh_token),
                ip("10.0.0.1"),
            )
            .await;
        assert!(matches!(replay, Err(AuthError::Unauthorized)));

        let next = h
            .service
            .refresh(request(&refreshed.access_token, &rotated), ip("10.0.0.1"))
            .await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn test_issue_rejects_blank_subject() {
        let h = harness();

        let result = h.service.issue("  ", ip("10.0.0.1")).await;
        assert!(matches!(result, Err(AuthError::InvalidInput(_))));
    }
}
