// Raw packet storage written by the logger; the dashboard views are built on it.

diesel::table! {
    messages_raw (id) {
        id -> Int4,
        ts -> Timestamptz,
        data -> Jsonb,
    }
}
