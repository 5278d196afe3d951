pub mod core;
pub mod marketing;
pub mod ticketing;

pub use self::core::*;
pub use self::marketing::*;
pub use self::ticketing::*;

diesel::joinable!(users -> tenants (tenant_id));
diesel::joinable!(user_queues -> users (user_id));
diesel::joinable!(user_queues -> queues (queue_id));
diesel::joinable!(contact_wallets -> contacts (contact_id));
diesel::joinable!(contact_wallets -> users (wallet_id));
diesel::joinable!(tickets -> contacts (contact_id));
diesel::joinable!(tickets -> whatsapps (whatsapp_id));
diesel::joinable!(tickets -> queues (queue_id));
diesel::joinable!(messages -> tickets (ticket_id));
diesel::joinable!(logs_tickets -> tickets (ticket_id));
diesel::joinable!(campaign_contacts -> campaigns (campaign_id));
diesel::joinable!(campaign_contacts -> contacts (contact_id));

diesel::allow_tables_to_appear_in_same_query!(
    tenants,
    users,
    queues,
    user_queues,
    chat_flows,
    whatsapps,
    contacts,
    contact_wallets,
    tickets,
    logs_tickets,
    messages,
    fast_replies,
    settings,
    campaigns,
    campaign_contacts,
    api_configs,
    api_messages,
);
