diesel::table! {
    tenants (id) {
        id -> Uuid,
        name -> Varchar,
        status -> Varchar,
        owner_id -> Nullable<Uuid>,
        max_users -> Int4,
        max_connections -> Int4,
        business_hours -> Jsonb,
        message_business_hours -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Varchar,
        email -> Varchar,
        password_hash -> Text,
        profile -> Varchar,
        token_version -> Int4,
        is_online -> Bool,
        last_login -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    queues (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Varchar,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    user_queues (user_id, queue_id) {
        user_id -> Uuid,
        queue_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    whatsapps (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Varchar,
        channel -> Varchar,
        status -> Varchar,
        phone_number -> Nullable<Varchar>,
        phone_number_id -> Nullable<Varchar>,
        access_token -> Nullable<Text>,
        verify_token -> Nullable<Varchar>,
        is_default -> Bool,
        is_active -> Bool,
        farewell_message -> Nullable<Text>,
        chat_flow_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    contacts (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Varchar,
        number -> Varchar,
        email -> Nullable<Varchar>,
        profile_pic_url -> Nullable<Text>,
        is_group -> Bool,
        extra_info -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    contact_wallets (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        contact_id -> Uuid,
        wallet_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    fast_replies (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        user_id -> Nullable<Uuid>,
        key -> Varchar,
        message -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    settings (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        key -> Varchar,
        value -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    chat_flows (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Varchar,
        flow -> Jsonb,
        user_id -> Nullable<Uuid>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    api_configs (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        session_id -> Uuid,
        user_id -> Nullable<Uuid>,
        name -> Varchar,
        token_hash -> Varchar,
        url_message_status -> Nullable<Text>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    api_messages (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        api_config_id -> Uuid,
        session_id -> Uuid,
        number -> Varchar,
        body -> Text,
        external_key -> Nullable<Varchar>,
        external_id -> Nullable<Varchar>,
        ack -> Int4,
        created_at -> Timestamptz,
    }
}
