//! Loads against a real PostgreSQL server. Each test returns early unless
//! `PGBULK_TEST_PG_URL` is set.
