//! Postgres DDL for the tables named in SPEC_FULL §6. One statement batch,
//! every statement `IF NOT EXISTS` so `Database::migrate` is idempotent and
//! safe to run on every startup.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS risk_profiles (
    risk_profile_id UUID PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    min_confluence SMALLINT NOT NULL,
    min_p_win NUMERIC(6,4) NOT NULL,
    min_kelly NUMERIC(6,4) NOT NULL,
    max_symbol_capital_pct NUMERIC(6,4) NOT NULL,
    max_portfolio_exposure_pct NUMERIC(6,4) NOT NULL,
    max_portfolio_log_loss NUMERIC(6,4) NOT NULL,
    max_symbol_log_loss NUMERIC(6,4) NOT NULL,
    max_position_log_loss NUMERIC(6,4) NOT NULL,
    max_pyramid_level INT NOT NULL,
    rebuy_spacing_atr NUMERIC(10,4) NOT NULL,
    velocity_multiplier NUMERIC(10,4) NOT NULL,
    cooldown_seconds BIGINT NOT NULL,
    max_hold_seconds BIGINT NOT NULL,
    max_daily_loss_pct NUMERIC(6,4) NOT NULL,
    max_weekly_loss_pct NUMERIC(6,4) NOT NULL,
    min_trade_value NUMERIC(18,2) NOT NULL,
    max_trade_value NUMERIC(18,2) NOT NULL,
    max_kelly_multiplier NUMERIC(6,4) NOT NULL
);

CREATE TABLE IF NOT EXISTS user_brokers (
    user_broker_id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    broker_code TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('DATA', 'EXEC')),
    env TEXT NOT NULL CHECK (env IN ('PRODUCTION', 'UAT', 'SANDBOX')),
    risk_profile_id UUID NOT NULL REFERENCES risk_profiles(risk_profile_id),
    credentials_ref TEXT NOT NULL,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    watchlist TEXT[] NOT NULL DEFAULT '{}',
    portfolio_paused BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS user_broker_sessions (
    session_id UUID PRIMARY KEY,
    user_broker_id UUID NOT NULL REFERENCES user_brokers(user_broker_id),
    access_token TEXT NOT NULL,
    valid_till TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('ACTIVE', 'EXPIRED', 'REVOKED')),
    version BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS candles (
    symbol TEXT NOT NULL,
    timeframe_minutes INT NOT NULL,
    bucket_start TIMESTAMPTZ NOT NULL,
    open NUMERIC(18,2) NOT NULL CHECK (open = round(open, 2) AND open > 0),
    high NUMERIC(18,2) NOT NULL CHECK (high = round(high, 2) AND high > 0),
    low NUMERIC(18,2) NOT NULL CHECK (low = round(low, 2) AND low > 0),
    close NUMERIC(18,2) NOT NULL CHECK (close = round(close, 2) AND close > 0),
    volume NUMERIC(18,2) NOT NULL,
    PRIMARY KEY (symbol, timeframe_minutes, bucket_start)
);

CREATE TABLE IF NOT EXISTS signals (
    signal_id UUID PRIMARY KEY,
    symbol TEXT NOT NULL,
    generated_at TIMESTAMPTZ NOT NULL,
    signal_day DATE GENERATED ALWAYS AS (DATE(generated_at)) STORED,
    confluence_type SMALLINT NOT NULL,
    composite_score NUMERIC(5,4) NOT NULL,
    strength TEXT NOT NULL,
    effective_floor NUMERIC(18,2) NOT NULL CHECK (effective_floor = round(effective_floor, 2)),
    effective_ceiling NUMERIC(18,2) NOT NULL CHECK (effective_ceiling = round(effective_ceiling, 2)),
    entry_low NUMERIC(18,2) NOT NULL CHECK (entry_low = round(entry_low, 2)),
    entry_high NUMERIC(18,2) NOT NULL CHECK (entry_high = round(entry_high, 2)),
    ref_price NUMERIC(18,2) NOT NULL CHECK (ref_price = round(ref_price, 2)),
    p_win NUMERIC(6,4) NOT NULL,
    kelly NUMERIC(6,4) NOT NULL,
    status TEXT NOT NULL,
    last_checked_at TIMESTAMPTZ NOT NULL,
    UNIQUE (symbol, confluence_type, signal_day, effective_floor, effective_ceiling)
);

CREATE TABLE IF NOT EXISTS trade_intents (
    intent_id UUID PRIMARY KEY,
    signal_id UUID NOT NULL REFERENCES signals(signal_id),
    user_broker_id UUID NOT NULL REFERENCES user_brokers(user_broker_id),
    approved_qty NUMERIC(18,2) NOT NULL,
    limit_price NUMERIC(18,2) NOT NULL CHECK (limit_price = round(limit_price, 2)),
    product_type TEXT NOT NULL,
    status TEXT NOT NULL,
    reject_reason TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (signal_id, user_broker_id)
);

CREATE TABLE IF NOT EXISTS trades (
    trade_id UUID PRIMARY KEY,
    intent_id UUID NOT NULL UNIQUE,
    client_order_id UUID NOT NULL UNIQUE,
    broker_order_id TEXT,
    user_broker_id UUID NOT NULL REFERENCES user_brokers(user_broker_id),
    symbol TEXT NOT NULL,
    entry_qty NUMERIC(18,2) NOT NULL,
    entry_price NUMERIC(18,2) CHECK (entry_price IS NULL OR entry_price = round(entry_price, 2)),
    filled_qty NUMERIC(18,2) NOT NULL DEFAULT 0,
    avg_fill_price NUMERIC(18,2),
    exit_price NUMERIC(18,2) CHECK (exit_price IS NULL OR exit_price = round(exit_price, 2)),
    status TEXT NOT NULL,
    trade_type TEXT NOT NULL,
    exit_target_price NUMERIC(18,2) NOT NULL,
    exit_stop_price NUMERIC(18,2) NOT NULL,
    trailing_highest_price NUMERIC(18,2),
    trailing_stop_price NUMERIC(18,2),
    exit_trigger TEXT,
    realized_pnl NUMERIC(18,2),
    reject_reason TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    last_broker_update_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    version BIGINT NOT NULL DEFAULT 1,
    UNIQUE (broker_order_id)
);

CREATE INDEX IF NOT EXISTS idx_trades_pending ON trades (status, updated_at) WHERE status = 'PENDING';
CREATE INDEX IF NOT EXISTS idx_trades_open ON trades (status, symbol, user_broker_id) WHERE status = 'OPEN';

CREATE TABLE IF NOT EXISTS exit_intents (
    exit_intent_id UUID PRIMARY KEY,
    trade_id UUID NOT NULL REFERENCES trades(trade_id),
    user_broker_id UUID NOT NULL,
    exit_reason TEXT NOT NULL,
    episode_id UUID NOT NULL,
    triggered_at TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL,
    broker_order_id TEXT,
    UNIQUE (trade_id, exit_reason, episode_id),
    UNIQUE (broker_order_id)
);

CREATE TABLE IF NOT EXISTS entry_cooldowns (
    user_broker_id UUID NOT NULL,
    symbol TEXT NOT NULL,
    last_trade_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (user_broker_id, symbol)
);
"#;
