mod index;

pub use index::index_page;

use extension_state::DeviceStatus;

/// Row class for a status; drives the LED colour in [`CSS`].
pub fn status_class(status: DeviceStatus) -> &'static str {
    match status {
        DeviceStatus::NotInUse => "",
        DeviceStatus::InUse => "in-use",
        DeviceStatus::Ringing | DeviceStatus::Busy => "ringing",
        DeviceStatus::Unavailable | DeviceStatus::Unknown => "disabled",
    }
}

// Shared CSS constant
pub const CSS: &str = r#"
body {
    font-family: system-ui, -apple-system, "Segoe UI", Roboto, sans-serif;
    margin: 0;
    background: #f4f6f8;
    color: #1f2933;
}
header {
    display: flex;
    align-items: center;
    justify-content: space-between;
    padding: 0.75rem 1.5rem;
    background: #fff;
    border-bottom: 1px solid #d9e2ec;
}
header .brand { display: flex; align-items: center; gap: 0.75rem; }
header img { max-height: 48px; }
main { max-width: 960px; margin: 1.5rem auto; padding: 0 1rem; }
table { width: 100%; border-collapse: collapse; background: #fff; }
th, td { text-align: left; padding: 0.5rem 0.75rem; border-bottom: 1px solid #e4e7eb; }
th.sortable { cursor: pointer; user-select: none; }
th.sortable.asc::after { content: " \25B2"; }
th.sortable.desc::after { content: " \25BC"; }
td.device-state::before {
    content: "";
    display: inline-block;
    width: 0.7rem;
    height: 0.7rem;
    margin-right: 0.5rem;
    border-radius: 50%;
    background: #3ebd61;
}
tr.in-use td.device-state::before { background: #e12d39; }
tr.ringing td.device-state::before { background: #f0b429; }
tr.disabled td.device-state::before { background: #9aa5b1; }
tr.disabled { color: #9aa5b1; }
button {
    padding: 0.4rem 0.9rem;
    border: 1px solid #bcccdc;
    border-radius: 4px;
    background: #fff;
    cursor: pointer;
}
dialog { border: 1px solid #bcccdc; border-radius: 6px; padding: 1.25rem; }
dialog input { display: block; margin: 0.5rem 0 0.75rem; padding: 0.4rem; width: 16rem; }
.error { color: #e12d39; }
.hidden { display: none; }
"#;

/// Live updates over `/events` plus table sorting.
pub const UPDATES_JS: &str = r#"
let currentSort = { column: 'extension', direction: 'asc' };

function cellValue(row, column) {
  if (column === 'extension') {
    return parseInt(row.querySelector('td').textContent, 10);
  }
  return row.querySelector('td:nth-child(2)').textContent.toLowerCase();
}

function sortTable(column) {
  const tbody = document.querySelector('#status-table tbody');
  if (currentSort.column === column) {
    currentSort.direction = currentSort.direction === 'asc' ? 'desc' : 'asc';
  } else {
    currentSort = { column, direction: 'asc' };
  }
  document.querySelectorAll('th.sortable').forEach(th => {
    th.classList.remove('asc', 'desc');
    if (th.dataset.sort === column) th.classList.add(currentSort.direction);
  });
  const sign = currentSort.direction === 'asc' ? 1 : -1;
  Array.from(tbody.querySelectorAll('tr'))
    .sort((a, b) => {
      const x = cellValue(a, column), y = cellValue(b, column);
      return x < y ? -sign : x > y ? sign : 0;
    })
    .forEach(row => tbody.appendChild(row));
}

document.querySelectorAll('th.sortable').forEach(th => {
  th.addEventListener('click', () => sortTable(th.dataset.sort));
});

function statusClass(status) {
  switch (status.toLowerCase()) {
    case 'not in use': return '';
    case 'in use': return 'in-use';
    case 'ringing':
    case 'busy': return 'ringing';
    default: return 'disabled';
  }
}

function insertSorted(tbody, row, extension) {
  const value = parseInt(extension, 10);
  const next = Array.from(tbody.querySelectorAll('tr'))
    .find(r => parseInt(r.querySelector('td').textContent, 10) > value);
  if (next) {
    tbody.insertBefore(row, next);
  } else {
    tbody.appendChild(row);
  }
}

function processStateUpdate(data) {
  const [extension, ...rest] = data.trim().split(' ');
  const status = rest.join(' ');
  if (!extension || !status || !/^\d+$/.test(extension)) return;

  let row = document.getElementById('e-' + extension);
  if (!row) {
    const tbody = document.querySelector('#status-table tbody');
    if (!tbody) return;
    row = document.createElement('tr');
    row.id = 'e-' + extension;
    for (const text of [extension, '', status]) {
      const cell = document.createElement('td');
      cell.textContent = text;
      row.appendChild(cell);
    }
    row.firstChild.classList.add('device-state');
    insertSorted(tbody, row, extension);
  }

  row.classList.remove('in-use', 'ringing', 'disabled');
  const cls = statusClass(status);
  if (cls) row.classList.add(cls);
  row.querySelector('td:nth-child(3)').textContent = status;
}

let source = null;
let retryDelay = 1000;
const maxRetryDelay = 30000;

function connect() {
  if (source !== null) source.close();
  source = new EventSource('/events');
  source.onopen = () => { retryDelay = 1000; };
  source.onmessage = (e) => {
    retryDelay = 1000;
    processStateUpdate(e.data);
  };
  source.onerror = () => {
    source.close();
    setTimeout(connect, retryDelay);
    retryDelay = Math.min(retryDelay * 2, maxRetryDelay);
  };
}

document.addEventListener('visibilitychange', () => {
  if (!document.hidden && source && source.readyState === EventSource.CLOSED) {
    location.reload();
  }
});

connect();
"#;

/// Login dialog and logout button.
pub const LOGIN_JS: &str = r#"
const loginBtn = document.getElementById('login-btn');
const logoutBtn = document.getElementById('logout-btn');
const dialog = document.getElementById('login-dialog');
const form = document.getElementById('login-form');
const loginError = document.getElementById('login-error');

if (loginBtn) loginBtn.addEventListener('click', () => dialog.showModal());

if (form) form.addEventListener('submit', async (e) => {
  e.preventDefault();
  const password = document.getElementById('password').value;
  try {
    const resp = await fetch('/api/login', {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({ password }),
    });
    if (resp.ok) {
      location.reload();
      return;
    }
  } catch (err) {
    console.error('Login error:', err);
  }
  loginError.classList.remove('hidden');
});

if (logoutBtn) logoutBtn.addEventListener('click', async () => {
  await fetch('/api/logout', { method: 'POST' });
  location.reload();
});
"#;
