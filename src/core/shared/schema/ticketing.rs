diesel::table! {
    tickets (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        contact_id -> Uuid,
        whatsapp_id -> Uuid,
        user_id -> Nullable<Uuid>,
        queue_id -> Nullable<Uuid>,
        status -> Varchar,
        channel -> Varchar,
        unread_messages -> Int4,
        last_message -> Nullable<Text>,
        last_message_at -> Nullable<Timestamptz>,
        answered -> Bool,
        is_group -> Bool,
        is_farewell_message -> Bool,
        chat_flow_id -> Nullable<Uuid>,
        step_chat_flow -> Nullable<Varchar>,
        bot_retries -> Int4,
        started_attendance_at -> Nullable<Timestamptz>,
        closed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    logs_tickets (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        ticket_id -> Uuid,
        user_id -> Nullable<Uuid>,
        queue_id -> Nullable<Uuid>,
        log_type -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    messages (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        ticket_id -> Uuid,
        contact_id -> Nullable<Uuid>,
        user_id -> Nullable<Uuid>,
        body -> Text,
        from_me -> Bool,
        read -> Bool,
        media_type -> Varchar,
        media_url -> Nullable<Text>,
        ack -> Int4,
        external_id -> Nullable<Varchar>,
        quoted_msg_id -> Nullable<Uuid>,
        is_deleted -> Bool,
        send_type -> Varchar,
        status -> Varchar,
        scheduled_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
