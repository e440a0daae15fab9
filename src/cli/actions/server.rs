use crate::api::{
    self,
    email::{EmailWorkerConfig, MailSettings},
    handlers::auth::AuthConfig,
};
use crate::cli::actions::Action;
use anyhow::Result;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server {
        port,
        dsn,
        base_url,
        frontend_origin,
        dev,
        admin_email,
        admin_password,
        mail_api_user,
        mail_api_key,
        mail_from,
    } = action;

    let mut config = AuthConfig::new(base_url, frontend_origin, dev);
    if let (Some(email), Some(password)) = (admin_email, admin_password) {
        config = config.with_admin_seed(email, password);
    }

    // All three mail settings are required for real delivery, otherwise
    // outbound email is logged by the dev sender.
    let mail = match (mail_api_user, mail_api_key, mail_from) {
        (Some(api_user), Some(api_key), Some(from)) => Some(MailSettings {
            api_user,
            api_key,
            from,
        }),
        _ => None,
    };

    api::serve(port, dsn, config, mail, EmailWorkerConfig::new()).await
}
