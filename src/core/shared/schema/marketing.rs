diesel::table! {
    campaigns (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Varchar,
        status -> Varchar,
        start_at -> Timestamptz,
        message1 -> Text,
        message2 -> Text,
        message3 -> Text,
        media_url -> Nullable<Text>,
        session_id -> Uuid,
        delay_seconds -> Int4,
        user_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    campaign_contacts (id) {
        id -> Uuid,
        campaign_id -> Uuid,
        contact_id -> Uuid,
        ack -> Int4,
        message_random -> Nullable<Varchar>,
        body -> Nullable<Text>,
        external_id -> Nullable<Varchar>,
        sent_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}
