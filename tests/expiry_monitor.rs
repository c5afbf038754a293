use std::time::Duration;

use assertr::prelude::*;
use citizenlink_session::{MonitorStep, ToastLevel, UserMeta};
use common::fakes::{Harness, Reply, role, valid_session};
use http::StatusCode;

mod common;

const STEADY: MonitorStep = MonitorStep::Continue {
    next_check: Duration::from_secs(5 * 60),
};
const RETRY: MonitorStep = MonitorStep::Continue {
    next_check: Duration::from_secs(30),
};

fn signed_in(url: &str) -> Harness {
    let h = Harness::on(url);
    h.provider().set_session(Some(valid_session("u1")));
    h.store()
        .save_user_meta(&UserMeta::new(Some("citizen".to_owned()), Some("Juan".to_owned())));
    h
}

fn assert_logged_out(h: &Harness) {
    let toasts = h.page().toasts();
    assert_that(toasts.len()).is_equal_to(1);
    assert_that(toasts[0].level).is_equal_to(ToastLevel::Error);
    assert_that(toasts[0].message.as_str())
        .is_equal_to("Authentication failed. Please log in again.");
    assert_that(toasts[0].duration).is_equal_to(Some(Duration::from_secs(5)));

    assert_that(h.provider().sign_outs()).is_equal_to(1);
    assert_that(h.backend().deleted_sessions()).is_equal_to(1);
    assert_that(h.page().credential_clears()).is_equal_to(1);
    assert_that(h.store().user_meta()).is_equal_to(None);
    assert_that(h.page().delayed_navigations()).is_equal_to(vec![(
        "/login?session_expired=true".to_owned(),
        Duration::from_secs(3),
    )]);
}

#[tokio::test]
async fn stops_without_a_session() {
    let h = Harness::on("https://portal.example.org/dashboard");
    assert_that(h.manager.check_token_expiry().await).is_equal_to(MonitorStep::Stop);
    assert_that(h.backend().role_fetches().len()).is_equal_to(0);
}

#[tokio::test]
async fn stops_on_auth_pages() {
    let h = signed_in("https://portal.example.org/login");
    h.backend().set_role(Reply::Status(StatusCode::UNAUTHORIZED));

    assert_that(h.manager.check_token_expiry().await).is_equal_to(MonitorStep::Stop);
    assert_that(h.backend().role_fetches().len()).is_equal_to(0);
    assert_that(h.page().toasts().len()).is_equal_to(0);
}

#[tokio::test]
async fn accepted_session_is_checked_again_later() {
    let h = signed_in("https://portal.example.org/dashboard");

    assert_that(h.manager.check_token_expiry().await).is_equal_to(STEADY);
    assert_that(h.backend().role_fetches()).is_equal_to(vec![Some("access-u1".to_owned())]);
}

#[tokio::test]
async fn checks_are_skipped_during_oauth() {
    let h = signed_in("https://portal.example.org/dashboard");
    h.store_oauth_context("login", "handoff", Duration::from_secs(1));

    assert_that(h.manager.check_token_expiry().await).is_equal_to(STEADY);
    assert_that(h.backend().role_fetches().len()).is_equal_to(0);
}

#[tokio::test]
async fn rejected_session_forces_a_logout() {
    let h = signed_in("https://portal.example.org/dashboard");
    h.store().set_device_trusted(true);
    h.backend().set_role(Reply::Status(StatusCode::UNAUTHORIZED));

    assert_that(h.manager.check_token_expiry().await).is_equal_to(MonitorStep::ForcedLogout);
    assert_logged_out(&h);
}

#[tokio::test]
async fn server_errors_are_retried_before_logging_out() {
    let h = signed_in("https://portal.example.org/dashboard");
    h.backend()
        .set_role(Reply::Status(StatusCode::INTERNAL_SERVER_ERROR));

    for _ in 0..2 {
        assert_that(h.manager.check_token_expiry().await).is_equal_to(RETRY);
    }
    assert_that(h.page().toasts().len()).is_equal_to(0);

    // The third consecutive failure ends the session.
    assert_that(h.manager.check_token_expiry().await).is_equal_to(MonitorStep::ForcedLogout);
    assert_logged_out(&h);
}

#[tokio::test]
async fn successful_check_resets_the_retry_budget() {
    let h = signed_in("https://portal.example.org/dashboard");
    h.backend()
        .set_role(Reply::Status(StatusCode::BAD_GATEWAY));
    h.backend()
        .push_role(Reply::Status(StatusCode::BAD_GATEWAY));
    h.backend()
        .push_role(Reply::Status(StatusCode::BAD_GATEWAY));
    h.backend().push_role(role("citizen"));

    assert_that(h.manager.check_token_expiry().await).is_equal_to(RETRY);
    assert_that(h.manager.check_token_expiry().await).is_equal_to(RETRY);
    assert_that(h.manager.check_token_expiry().await).is_equal_to(STEADY);

    for _ in 0..2 {
        assert_that(h.manager.check_token_expiry().await).is_equal_to(RETRY);
    }
    assert_that(h.provider().sign_outs()).is_equal_to(0);
}

#[tokio::test]
async fn exempt_pages_stop_monitoring_instead_of_logging_out() {
    let h = signed_in("https://portal.example.org/review-queue");
    h.backend()
        .set_role(Reply::Status(StatusCode::INTERNAL_SERVER_ERROR));

    for _ in 0..2 {
        assert_that(h.manager.check_token_expiry().await).is_equal_to(RETRY);
    }
    assert_that(h.manager.check_token_expiry().await).is_equal_to(MonitorStep::Stop);
    assert_that(h.provider().sign_outs()).is_equal_to(0);
    assert_that(h.page().toasts().len()).is_equal_to(0);
}

#[tokio::test]
async fn stops_when_offline() {
    let h = signed_in("https://portal.example.org/dashboard");
    h.backend().set_role(Reply::Offline);

    assert_that(h.manager.check_token_expiry().await).is_equal_to(MonitorStep::Stop);
    assert_that(h.provider().sign_outs()).is_equal_to(0);
}

#[tokio::test]
async fn suppression_window_prevents_one_logout() {
    let h = signed_in("https://portal.example.org/dashboard");
    h.store()
        .suppress_auth_error_notifications(Duration::from_secs(8));
    h.backend().set_role(Reply::Status(StatusCode::UNAUTHORIZED));

    assert_that(h.manager.check_token_expiry().await).is_equal_to(MonitorStep::Stop);
    assert_that(h.provider().sign_outs()).is_equal_to(0);

    // The window was consumed.
    assert_that(h.manager.check_token_expiry().await).is_equal_to(MonitorStep::ForcedLogout);
}

#[tokio::test]
async fn pending_signup_is_not_logged_out() {
    let h = signed_in("https://portal.example.org/dashboard");
    h.store_oauth_context("signup", "pending", Duration::from_secs(1));

    assert_that(h.manager.handle_session_expired().await).is_false();
    assert_that(h.provider().sign_outs()).is_equal_to(0);
    assert_that(h.page().toasts().len()).is_equal_to(0);
}

#[tokio::test]
async fn monitor_loop_runs_until_the_session_is_rejected() {
    let h = signed_in("https://portal.example.org/dashboard");
    h.backend().push_role(role("citizen"));
    h.backend().set_role(Reply::Status(StatusCode::UNAUTHORIZED));

    h.manager.start_token_expiry_monitoring();
    assert_that(h.page().spawned()).is_equal_to(1);
    assert_that(h.page().run_next_spawned().await).is_true();

    // The first check runs right away.
    assert_that(h.backend().role_fetches().len()).is_equal_to(2);
    assert_that(h.page().sleeps()).is_equal_to(vec![Duration::from_secs(5 * 60)]);
    assert_logged_out(&h);
}

#[tokio::test]
async fn stopped_monitor_never_checks() {
    let h = signed_in("https://portal.example.org/dashboard");
    h.backend().set_role(Reply::Status(StatusCode::UNAUTHORIZED));

    h.manager.start_token_expiry_monitoring();
    h.manager.stop_token_expiry_monitoring();
    assert_that(h.page().run_next_spawned().await).is_true();

    assert_that(h.backend().role_fetches().len()).is_equal_to(0);
    assert_that(h.provider().sign_outs()).is_equal_to(0);
}

#[tokio::test]
async fn restarting_replaces_the_running_monitor() {
    let h = signed_in("https://portal.example.org/dashboard");
    h.backend().set_role(Reply::Status(StatusCode::UNAUTHORIZED));

    h.manager.start_token_expiry_monitoring();
    h.manager.start_token_expiry_monitoring();

    assert_that(h.page().run_next_spawned().await).is_true();
    assert_that(h.backend().role_fetches().len()).is_equal_to(0);

    assert_that(h.page().run_next_spawned().await).is_true();
    assert_that(h.backend().role_fetches().len()).is_equal_to(1);
    assert_logged_out(&h);
}

#[tokio::test]
async fn monitor_is_not_started_on_auth_pages() {
    let h = signed_in("https://portal.example.org/signup");
    h.manager.start_token_expiry_monitoring();
    assert_that(h.page().spawned()).is_equal_to(0);
}
